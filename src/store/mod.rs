//! In-memory recent-activity store
//!
//! Records are bucketed by the second they arrive in. Queries answer "the
//! last `seconds` seconds, or at least `count` records, whichever is larger",
//! and a background reaper drops old buckets once enough records exist.
//!
//! ## Architecture
//!
//! ```text
//! producers ──► add() ──┐
//!                       ├──► RwLock<BucketIndex> ◄── Reaper (every cleanup_interval)
//! consumers ──► query()─┘
//! ```
//!
//! Bucket map, key list and record count live behind one lock, so every
//! insert and eviction is a single atomic step for all other observers.

pub mod clock;
pub mod config;
pub mod dst;
pub mod error;
pub mod index;
pub mod query;
pub mod reaper;
pub mod record;

pub use clock::{ArrivalTime, BucketKey, ProductionClock, SimulatedClock, StoreClock};
pub use config::StoreConfig;
pub use error::StoreError;
pub use index::BucketIndex;
pub use query::RecentQuery;
pub use reaper::{spawn_reaper, Reaper, ReaperHandle, TickReport};
pub use record::{Record, SharedRecord};

use crate::config::ConfigError;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::trace;

/// The index shared between the store handle and its reaper
pub type SharedIndex = Arc<RwLock<BucketIndex>>;

/// Point-in-time view of the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_records: usize,
    pub bucket_count: usize,
    pub oldest_key: Option<BucketKey>,
    pub newest_key: Option<BucketKey>,
    pub evicted_buckets: u64,
    pub evicted_records: u64,
}

/// Owned store handle.
///
/// Create one with [`RecentStore::start`] and share it (e.g. in an `Arc`).
/// The reaper lives exactly as long as the handle: [`RecentStore::shutdown`]
/// stops it cleanly, and dropping the store stops it too.
pub struct RecentStore<C: StoreClock = ProductionClock> {
    index: SharedIndex,
    clock: C,
    config: StoreConfig,
    reaper_handle: Mutex<Option<ReaperHandle>>,
}

impl<C: StoreClock> RecentStore<C> {
    /// Build the store and spawn its reaper on the current tokio runtime.
    pub fn start(config: StoreConfig, clock: C) -> Result<Self, ConfigError> {
        let store = Self::detached(config, clock)?;
        let handle = spawn_reaper(store.build_reaper(), store.config.cleanup_interval());
        *store.reaper_handle.lock() = Some(handle);
        Ok(store)
    }

    /// Build the store without a background reaper. Eviction only happens
    /// through [`RecentStore::reap_now`].
    pub fn detached(config: StoreConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(RecentStore {
            index: Arc::new(RwLock::new(BucketIndex::new())),
            clock,
            config,
            reaper_handle: Mutex::new(None),
        })
    }

    fn build_reaper(&self) -> Reaper<C> {
        Reaper::new(self.index.clone(), self.clock.clone(), &self.config)
    }

    /// Ingest one record, bucketed by the arrival second observed now.
    pub fn add(&self, record: Record) {
        let record = Arc::new(record);
        let mut index = self.index.write();
        let key = self.clock.now().bucket_key();
        if index.insert(key, record) {
            trace!(key = %key, "opened bucket");
        }
    }

    /// Most recent activity: everything from the last `seconds` seconds,
    /// topped up with older records until at least `count` are returned.
    ///
    /// The result is not globally time-ordered. The window segment comes
    /// first (oldest second to now), then any backfill walking backwards
    /// from the newest older bucket. Each segment keeps arrival order.
    ///
    /// Returns `StoreError::InvalidArgument` if either argument is not
    /// positive.
    pub fn latest(&self, count: i64, seconds: i64) -> Result<Vec<SharedRecord>, StoreError> {
        let query = RecentQuery::new(count, seconds)?;
        Ok(self.query(&query))
    }

    /// Run an already-validated query
    pub fn query(&self, query: &RecentQuery) -> Vec<SharedRecord> {
        let index = self.index.read();
        let now = self.clock.now().bucket_key();
        query::collect_recent(&index, now, query)
    }

    /// Run one reaper tick on the calling thread
    pub fn reap_now(&self) -> Result<TickReport, StoreError> {
        self.build_reaper().tick()
    }

    pub fn stats(&self) -> StoreStats {
        let index = self.index.read();
        StoreStats {
            total_records: index.total(),
            bucket_count: index.bucket_count(),
            oldest_key: index.oldest_key(),
            newest_key: index.newest_key(),
            evicted_buckets: index.evicted_buckets(),
            evicted_records: index.evicted_records(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.read().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_invariants(&self) -> Result<(), Vec<String>> {
        self.index.read().check_invariants()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Whether a background reaper is attached and still running
    pub fn reaper_running(&self) -> bool {
        self.reaper_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the reaper and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.reaper_handle.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RecentStore<SimulatedClock> {
        RecentStore::detached(StoreConfig::test(), SimulatedClock::new(1_000_000)).unwrap()
    }

    #[test]
    fn test_add_buckets_by_arrival_second() {
        let store = store();
        store.add(Record::new(1, "a"));
        store.clock().advance_ms(999);
        store.add(Record::new(2, "b"));
        store.clock().advance_ms(1);
        store.add(Record::new(3, "c"));

        let stats = store.stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.bucket_count, 2);
        assert_eq!(stats.oldest_key, Some(BucketKey(1000)));
        assert_eq!(stats.newest_key, Some(BucketKey(1001)));
    }

    #[test]
    fn test_latest_validates_arguments() {
        let store = store();
        assert!(matches!(
            store.latest(0, 2),
            Err(StoreError::InvalidArgument { name: "count", .. })
        ));
        assert!(matches!(
            store.latest(5, 0),
            Err(StoreError::InvalidArgument { name: "seconds", .. })
        ));
        assert!(store.latest(5, 2).unwrap().is_empty());
    }

    #[test]
    fn test_detached_rejects_invalid_config() {
        let config = StoreConfig {
            cleanup_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert!(RecentStore::detached(config, SimulatedClock::new(0)).is_err());
    }

    #[test]
    fn test_reap_now_updates_stats() {
        let store = RecentStore::detached(
            StoreConfig {
                retention_window_secs: 1,
                minimum_items_to_keep: 0,
                cleanup_interval_secs: 1,
            },
            SimulatedClock::new(0),
        )
        .unwrap();
        for _ in 0..3 {
            store.add(Record::new(0, "t"));
            store.clock().advance_ms(1000);
        }
        store.clock().advance_ms(5000);

        let report = store.reap_now().unwrap();
        assert_eq!(report.records_removed(), 2);

        let stats = store.stats();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.evicted_buckets, 2);
        assert_eq!(stats.evicted_records, 2);
    }

    #[tokio::test]
    async fn test_start_attaches_reaper_and_shutdown_detaches() {
        let store = RecentStore::start(StoreConfig::test(), SimulatedClock::new(0)).unwrap();
        assert!(store.reaper_running());

        store.shutdown().await;
        assert!(!store.reaper_running());
        // Second call is a no-op
        store.shutdown().await;
    }
}
