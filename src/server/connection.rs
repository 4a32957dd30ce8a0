use super::protocol::{self, Response};
use crate::store::{RecentStore, StoreClock};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Longest request line accepted before the connection is closed (default: 1 MiB)
    pub max_line_bytes: usize,
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_line_bytes: 1024 * 1024,
            read_buffer_size: 8192,
        }
    }
}

pub struct ConnectionHandler<S, C: StoreClock> {
    stream: S,
    store: Arc<RecentStore<C>>,
    buffer: BytesMut,
    write_buffer: BytesMut,
    client_addr: String,
    config: ConnectionConfig,
    requests: u64,
}

impl<S, C> ConnectionHandler<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: StoreClock,
{
    pub fn new(
        stream: S,
        store: Arc<RecentStore<C>>,
        client_addr: String,
        config: ConnectionConfig,
    ) -> Self {
        ConnectionHandler {
            stream,
            store,
            buffer: BytesMut::with_capacity(config.read_buffer_size),
            write_buffer: BytesMut::with_capacity(config.read_buffer_size),
            client_addr,
            config,
            requests: 0,
        }
    }

    pub async fn run(mut self) {
        info!("Client connected: {}", self.client_addr);

        loop {
            match self.stream.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    // Serve a final request sent without a trailing newline
                    if !self.buffer.is_empty() {
                        let line = self.buffer.split();
                        self.handle_line(&line);
                        let _ = self.flush().await;
                    }
                    info!("Client disconnected: {}", self.client_addr);
                    break;
                }
                Ok(_) => {
                    while let Some(pos) = memchr::memchr(b'\n', &self.buffer) {
                        let line = self.buffer.split_to(pos + 1);
                        self.handle_line(&line[..pos]);
                    }

                    let oversized = self.buffer.len() > self.config.max_line_bytes;
                    if oversized {
                        warn!(
                            "Request line from {} exceeds {} bytes, closing connection",
                            self.client_addr, self.config.max_line_bytes
                        );
                        Response::too_large(self.config.max_line_bytes)
                            .encode_into(&mut self.write_buffer);
                    }

                    if let Err(e) = self.flush().await {
                        error!("Write failed to {}: {}", self.client_addr, e);
                        break;
                    }
                    if oversized {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Read error from {}: {}", self.client_addr, e);
                    break;
                }
            }
        }

        debug!(
            client = %self.client_addr,
            requests = self.requests,
            stats = ?self.store.stats(),
            "connection closed"
        );
    }

    fn handle_line(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        self.requests += 1;

        let response = match protocol::parse_request(line) {
            Ok(request) => protocol::execute(&self.store, request),
            Err(response) => {
                debug!("Malformed request from {}", self.client_addr);
                response
            }
        };
        response.encode_into(&mut self.write_buffer);
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        self.write_buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SimulatedClock, StoreConfig};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    fn store() -> Arc<RecentStore<SimulatedClock>> {
        Arc::new(RecentStore::detached(StoreConfig::test(), SimulatedClock::new(10_000)).unwrap())
    }

    #[tokio::test]
    async fn test_pipelined_lines_answered_in_order() {
        let (client, server) = duplex(64 * 1024);
        let store = store();
        let handler =
            ConnectionHandler::new(server, store.clone(), "test".into(), ConnectionConfig::default());
        let task = tokio::spawn(handler.run());

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"{\"op\":\"add\",\"item\":{\"id\":1,\"timestamp\":\"a\"}}\r\nbogus\n\n{\"op\":\"latest\"}")
            .await
            .unwrap();
        write_half.shutdown().await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let second = lines.next_line().await.unwrap().unwrap();
        let third = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, "{\"status\":201}");
        assert!(second.starts_with("{\"status\":400"));
        assert!(third.starts_with("{\"status\":200,\"count\":1"));

        task.await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_line_closes_with_413() {
        let (client, server) = duplex(64 * 1024);
        let config = ConnectionConfig {
            max_line_bytes: 16,
            read_buffer_size: 64,
        };
        let task = tokio::spawn(ConnectionHandler::new(server, store(), "test".into(), config).run());

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(&[b'x'; 64]).await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with("{\"status\":413"));
        assert!(lines.next_line().await.unwrap().is_none());

        task.await.unwrap();
    }
}
