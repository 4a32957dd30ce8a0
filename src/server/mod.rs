//! TCP front end for the record store
//!
//! Speaks newline-delimited JSON; see [`protocol`] for the message shapes.
//! Each accepted client gets its own task running a [`ConnectionHandler`].

pub mod connection;
pub mod protocol;

pub use connection::{ConnectionConfig, ConnectionHandler};
pub use protocol::{Request, Response};

use crate::store::{ProductionClock, RecentStore, StoreClock};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct ActivityServer<C: StoreClock = ProductionClock> {
    listener: TcpListener,
    store: Arc<RecentStore<C>>,
    config: ConnectionConfig,
}

impl<C: StoreClock> ActivityServer<C> {
    pub async fn bind(addr: SocketAddr, store: Arc<RecentStore<C>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ActivityServer {
            listener,
            store,
            config: ConnectionConfig::default(),
        })
    }

    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until `shutdown` resolves. Connections already in
    /// flight keep running on their own tasks.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        info!("Activity server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            error!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let handler = ConnectionHandler::new(
                            stream,
                            self.store.clone(),
                            addr.to_string(),
                            self.config.clone(),
                        );
                        tokio::spawn(handler.run());
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}
