//! Configuration for the record store
//!
//! Values are fixed for the lifetime of a store; there is no hot reload.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retention and eviction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Buckets younger than this are never evicted (default: 2s)
    pub retention_window_secs: u64,
    /// Eviction pauses once the store would drop below this many records (default: 100)
    pub minimum_items_to_keep: usize,
    /// Reaper wake-up period (default: 5s)
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            retention_window_secs: 2,
            minimum_items_to_keep: 100,
            cleanup_interval_secs: 5,
        }
    }
}

impl StoreConfig {
    /// Configuration for tests (tight window, fast reaper)
    pub fn test() -> Self {
        StoreConfig {
            retention_window_secs: 2,
            minimum_items_to_keep: 100,
            cleanup_interval_secs: 1,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "retention_window_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
