pub mod config;
pub mod observability;
pub mod server;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use server::ActivityServer;
pub use store::{
    ProductionClock, Record, RecentStore, SharedRecord, SimulatedClock, StoreClock, StoreConfig,
    StoreError, StoreStats,
};
