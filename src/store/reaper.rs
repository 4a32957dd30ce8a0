//! Reaper - background bucket eviction
//!
//! Wakes every `cleanup_interval` and drops whole buckets from the head of
//! the key list while both conditions hold:
//!
//! - the bucket is older than the retention window
//! - dropping it leaves at least `minimum_items_to_keep` records
//!
//! ```text
//! Idle ──► Tick ──► Evaluate ──┬──► Evict* ──┐
//!  ▲                           └──► Skip ────┤
//!  └────────────── Sleep ◄───────────────────┘     (shutdown ends the loop)
//! ```
//!
//! A failing or panicking tick is logged and the loop carries on.

use super::clock::{ArrivalTime, BucketKey, StoreClock};
use super::config::StoreConfig;
use super::error::StoreError;
use super::SharedIndex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one reaper tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Clock reading the age test was evaluated against
    pub evaluated_at: ArrivalTime,
    pub total_before: usize,
    pub total_after: usize,
    /// Evicted buckets with their sizes, oldest first
    pub evicted: Vec<(BucketKey, usize)>,
}

impl TickReport {
    pub fn records_removed(&self) -> usize {
        self.evicted.iter().map(|(_, n)| n).sum()
    }

    pub fn evicted_nothing(&self) -> bool {
        self.evicted.is_empty()
    }
}

pub struct Reaper<C: StoreClock> {
    index: SharedIndex,
    clock: C,
    retention_window: Duration,
    minimum_items: usize,
}

impl<C: StoreClock> Reaper<C> {
    pub fn new(index: SharedIndex, clock: C, config: &StoreConfig) -> Self {
        Reaper {
            index,
            clock,
            retention_window: config.retention_window(),
            minimum_items: config.minimum_items_to_keep,
        }
    }

    /// Run one eviction pass.
    ///
    /// The index lock is taken per eviction, not for the whole pass, so
    /// inserts and queries interleave with a long tick.
    pub fn tick(&self) -> Result<TickReport, StoreError> {
        let now = self.clock.now();
        let window_secs = self.retention_window.as_secs();
        let mut snapshot = self.index.read().total();
        let mut report = TickReport {
            evaluated_at: now,
            total_before: snapshot,
            total_after: snapshot,
            evicted: Vec::new(),
        };

        loop {
            let mut index = self.index.write();
            report.total_after = index.total();

            if index.bucket_count() as u64 <= window_secs
                || snapshot <= self.minimum_items
            {
                break;
            }

            // Keys are in arrival order, so if the head fails the age test
            // every younger bucket does too.
            let Some(key) = index.oldest_key() else {
                break;
            };
            let Some(size) = index.bucket(key).map(<[_]>::len) else {
                return Err(StoreError::EvictionFailed(format!(
                    "key {} is registered without a bucket",
                    key
                )));
            };

            let old_enough = key.age_at(now) > self.retention_window;
            let keeps_floor = index.total().saturating_sub(size) >= self.minimum_items;
            if !(old_enough && keeps_floor) {
                break;
            }

            let removed = index.evict(key).ok_or_else(|| {
                StoreError::EvictionFailed(format!("bucket {} vanished during eviction", key))
            })?;
            report.total_after = index.total();
            drop(index);

            snapshot = snapshot.saturating_sub(removed);
            warn!(key = %key, records_removed = removed, "evicted bucket");
            report.evicted.push((key, removed));
        }

        Ok(report)
    }

    /// Tick with failures contained: errors and panics are logged, never
    /// propagated.
    pub fn supervised_tick(&self) -> Option<TickReport> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
            Ok(Ok(report)) => {
                debug!(
                    evicted_buckets = report.evicted.len(),
                    records_removed = report.records_removed(),
                    total = report.total_after,
                    "reaper tick complete"
                );
                Some(report)
            }
            Ok(Err(e)) => {
                error!(error = %e, "reaper tick failed");
                None
            }
            Err(payload) => {
                error!(panic = panic_message(payload.as_ref()), "reaper tick panicked");
                None
            }
        }
    }

    /// Run the loop until `shutdown_rx` fires or its sender is dropped.
    /// The first tick happens one full period after start.
    pub async fn run(self, period: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            period_secs = period.as_secs(),
            retention_window_secs = self.retention_window.as_secs(),
            minimum_items_to_keep = self.minimum_items,
            "reaper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.supervised_tick();
                }
                _ = &mut shutdown_rx => break,
            }
        }

        info!("reaper stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle to a running reaper task
pub struct ReaperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal shutdown and wait for the loop to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            error!(error = %e, "reaper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a reaper on the current tokio runtime
pub fn spawn_reaper<C: StoreClock>(reaper: Reaper<C>, period: Duration) -> ReaperHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(reaper.run(period, shutdown_rx));
    ReaperHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}
