//! Recent-activity server
//!
//! Usage: `recent-activity [CONFIG.toml]`
//!
//! Settings come from the optional TOML file, then `RECENT_*` environment
//! variables (see `recent_activity::config`).

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use recent_activity::observability::init_tracing;
use recent_activity::{ActivityServer, AppConfig, ProductionClock, RecentStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(path.as_deref())?;
    init_tracing(&config.log)?;

    info!(
        retention_window_secs = config.store.retention_window_secs,
        minimum_items_to_keep = config.store.minimum_items_to_keep,
        cleanup_interval_secs = config.store.cleanup_interval_secs,
        "starting recent-activity"
    );

    let store = Arc::new(RecentStore::start(config.store.clone(), ProductionClock::new())?);
    let server = ActivityServer::bind(config.listen_addr, store.clone()).await?;

    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    store.shutdown().await;
    info!(stats = ?store.stats(), "shutdown complete");

    result?;
    Ok(())
}
