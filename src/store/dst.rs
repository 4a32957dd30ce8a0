//! Deterministic Simulation Testing for the Record Store
//!
//! Shadow-state harness that drives a detached `RecentStore` with a seeded
//! workload on a `SimulatedClock`, checking invariants after every step.
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = StoreDSTHarness::new(StoreDSTConfig::calm(seed))?;
//!     harness.run(500);
//!     assert!(harness.result().is_success());   // violations carry the seed
//! }
//! ```
//!
//! ## Checked after every operation
//!
//! - index structure (counter = Σ bucket sizes, key list ⇔ buckets)
//! - store size matches the shadow model
//! - query result size, uniqueness and membership
//! - back-to-back queries return identical results
//! - a reaper tick never drops below the floor nor evicts a young bucket,
//!   and only stops at a head bucket that fails the age or floor test

use super::clock::{ArrivalTime, BucketKey, SimulatedClock, StoreClock};
use super::config::StoreConfig;
use super::error::StoreError;
use super::record::Record;
use super::RecentStore;
use crate::config::ConfigError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};

/// Configuration for store DST
#[derive(Debug, Clone)]
pub struct StoreDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Store under test
    pub store_config: StoreConfig,
    /// Largest number of records in one insert burst
    pub max_burst: usize,
    /// Largest single clock advance
    pub max_advance_ms: u64,
    pub advance_probability: f64,
    pub query_probability: f64,
    pub reap_probability: f64,
    /// Upper bound for generated query `count`
    pub max_query_count: i64,
    /// Upper bound for generated query `seconds`
    pub max_query_seconds: i64,
    /// Probability a query carries a non-positive argument
    pub invalid_query_probability: f64,
}

impl Default for StoreDSTConfig {
    fn default() -> Self {
        StoreDSTConfig {
            seed: 0,
            store_config: StoreConfig::default(),
            max_burst: 50,
            max_advance_ms: 1_500,
            advance_probability: 0.25,
            query_probability: 0.2,
            reap_probability: 0.1,
            max_query_count: 200,
            max_query_seconds: 5,
            invalid_query_probability: 0.02,
        }
    }
}

impl StoreDSTConfig {
    pub fn new(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Small bursts, slow clock, default retention
    pub fn calm(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            max_burst: 10,
            max_advance_ms: 700,
            ..Default::default()
        }
    }

    /// Large bursts against a low floor
    pub fn bursty(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            store_config: StoreConfig {
                retention_window_secs: 3,
                minimum_items_to_keep: 20,
                cleanup_interval_secs: 1,
            },
            max_burst: 400,
            max_query_count: 600,
            ..Default::default()
        }
    }

    /// Fast clock and frequent reaping with no floor
    pub fn churn(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            store_config: StoreConfig {
                retention_window_secs: 1,
                minimum_items_to_keep: 0,
                cleanup_interval_secs: 1,
            },
            max_advance_ms: 4_000,
            advance_probability: 0.35,
            reap_probability: 0.3,
            max_query_seconds: 10,
            ..Default::default()
        }
    }
}

/// Store operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    /// Insert a burst of records at the current instant
    Insert { records: usize },
    /// Move the simulated clock forward
    Advance { millis: u64 },
    /// Query (arguments may be deliberately invalid)
    Query { count: i64, seconds: i64 },
    /// Run one reaper tick
    Reap,
}

/// Workload generator
pub struct StoreWorkload {
    rng: ChaCha8Rng,
    config: StoreDSTConfig,
    next_id: i64,
}

impl StoreWorkload {
    pub fn new(config: StoreDSTConfig) -> Self {
        StoreWorkload {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            next_id: 0,
        }
    }

    /// Generate the next operation
    pub fn next_operation(&mut self) -> StoreOperation {
        let roll: f64 = self.rng.gen();
        let c = &self.config;

        if roll < c.advance_probability {
            StoreOperation::Advance {
                millis: self.rng.gen_range(1..=c.max_advance_ms),
            }
        } else if roll < c.advance_probability + c.query_probability {
            if self.rng.gen_bool(c.invalid_query_probability) {
                StoreOperation::Query {
                    count: self.rng.gen_range(-2..=0),
                    seconds: self.rng.gen_range(-2..=c.max_query_seconds),
                }
            } else {
                StoreOperation::Query {
                    count: self.rng.gen_range(1..=c.max_query_count),
                    seconds: self.rng.gen_range(1..=c.max_query_seconds),
                }
            }
        } else if roll < c.advance_probability + c.query_probability + c.reap_probability {
            StoreOperation::Reap
        } else {
            StoreOperation::Insert {
                records: self.rng.gen_range(1..=c.max_burst),
            }
        }
    }

    /// Allocate the next record id
    pub fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Result of a DST run
#[derive(Debug, Clone, Default)]
pub struct StoreDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub inserts: u64,
    pub queries: u64,
    pub rejected_queries: u64,
    pub reaps: u64,
    pub records_inserted: u64,
    pub records_evicted: u64,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
}

impl StoreDSTResult {
    pub fn new(seed: u64) -> Self {
        StoreDSTResult {
            seed,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} inserts, {} queries, {} rejected, {} reaps), {} records in, {} evicted, {} violations",
            self.seed,
            self.total_operations,
            self.inserts,
            self.queries,
            self.rejected_queries,
            self.reaps,
            self.records_inserted,
            self.records_evicted,
            self.invariant_violations.len()
        )
    }
}

/// Main DST harness for the record store
pub struct StoreDSTHarness {
    config: StoreDSTConfig,
    clock: SimulatedClock,
    store: RecentStore<SimulatedClock>,
    workload: StoreWorkload,
    /// Ground truth: record ids per bucket, in arrival order
    shadow: BTreeMap<BucketKey, Vec<i64>>,
    result: StoreDSTResult,
}

impl StoreDSTHarness {
    /// Create a new DST harness
    pub fn new(config: StoreDSTConfig) -> Result<Self, ConfigError> {
        // Start well past the epoch so window arithmetic never clamps
        let clock = SimulatedClock::new(1_700_000_000_000);
        let store = RecentStore::detached(config.store_config.clone(), clock.clone())?;
        let workload = StoreWorkload::new(config.clone());
        let result = StoreDSTResult::new(config.seed);

        Ok(StoreDSTHarness {
            config,
            clock,
            store,
            workload,
            shadow: BTreeMap::new(),
            result,
        })
    }

    /// Run the workload for a specified number of operations
    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op);
        }
    }

    /// Execute a single operation, then check the structural invariants
    pub fn execute_operation(&mut self, op: StoreOperation) {
        self.result.total_operations += 1;

        match op {
            StoreOperation::Insert { records } => self.execute_insert(records),
            StoreOperation::Advance { millis } => self.clock.advance_ms(millis),
            StoreOperation::Query { count, seconds } => self.execute_query(count, seconds),
            StoreOperation::Reap => self.execute_reap(),
        }

        self.check_structure();
    }

    fn execute_insert(&mut self, records: usize) {
        self.result.inserts += 1;
        let key = self.clock.now().bucket_key();
        for _ in 0..records {
            let id = self.workload.next_id();
            self.store.add(Record::new(id, format!("dst-{}", id)));
            self.shadow.entry(key).or_default().push(id);
        }
        self.result.records_inserted += records as u64;
    }

    fn execute_query(&mut self, count: i64, seconds: i64) {
        let first = match self.store.latest(count, seconds) {
            Ok(records) => records,
            Err(StoreError::InvalidArgument { .. }) if count <= 0 || seconds <= 0 => {
                self.result.rejected_queries += 1;
                return;
            }
            Err(e) => {
                self.violation(format!("query({}, {}) failed: {}", count, seconds, e));
                return;
            }
        };
        self.result.queries += 1;

        if count <= 0 || seconds <= 0 {
            self.violation(format!("query({}, {}) was accepted", count, seconds));
            return;
        }

        let ids: Vec<i64> = first.iter().map(|r| r.id).collect();

        let expected = self.expected_len(count as usize, seconds as u64);
        if ids.len() != expected {
            self.violation(format!(
                "query({}, {}) returned {} records, expected {}",
                count,
                seconds,
                ids.len(),
                expected
            ));
        }

        let unique: HashSet<i64> = ids.iter().copied().collect();
        if unique.len() != ids.len() {
            self.violation(format!("query({}, {}) returned duplicates", count, seconds));
        }

        let stored: HashSet<i64> = self.shadow.values().flatten().copied().collect();
        if let Some(stray) = ids.iter().find(|id| !stored.contains(*id)) {
            self.violation(format!("query returned id {} which is not stored", stray));
        }

        if self.shadow_total() <= count as usize {
            let all: Vec<i64> = self.shadow.values().flatten().copied().collect();
            if ids != all {
                self.violation("fast path did not return every record in order".to_string());
            }
        }

        let again: Vec<i64> = match self.store.latest(count, seconds) {
            Ok(records) => records.iter().map(|r| r.id).collect(),
            Err(e) => {
                self.violation(format!("repeat query failed: {}", e));
                return;
            }
        };
        if again != ids {
            self.violation(format!("query({}, {}) is not idempotent", count, seconds));
        }
    }

    fn execute_reap(&mut self) {
        self.result.reaps += 1;
        let window = self.config.store_config.retention_window();
        let floor = self.config.store_config.minimum_items_to_keep;
        let before = self.shadow_total();

        let report = match self.store.reap_now() {
            Ok(report) => report,
            Err(e) => {
                self.violation(format!("reap failed: {}", e));
                return;
            }
        };

        if report.total_before != before {
            self.violation(format!(
                "reap saw {} records, shadow holds {}",
                report.total_before, before
            ));
        }

        for (key, size) in &report.evicted {
            if key.age_at(report.evaluated_at) <= window {
                self.violation(format!("evicted bucket {} younger than the window", key));
            }
            match self.shadow.pop_first() {
                Some((oldest, ids)) if oldest == *key && ids.len() == *size => {}
                Some((oldest, ids)) => self.violation(format!(
                    "evicted {} ({} records) but oldest shadow bucket is {} ({} records)",
                    key,
                    size,
                    oldest,
                    ids.len()
                )),
                None => self.violation(format!("evicted {} from an empty shadow", key)),
            }
            self.result.records_evicted += *size as u64;
        }

        let after = self.store.len();
        if before > floor && after < floor {
            self.violation(format!(
                "reap dropped below the floor: {} -> {} (floor {})",
                before, after, floor
            ));
        }

        self.check_reap_stopped_at_head(report.evaluated_at);
    }

    /// A tick may only stop while more buckets than the window remain and
    /// the store is above the floor if the head bucket fails the age or
    /// floor test.
    fn check_reap_stopped_at_head(&mut self, evaluated_at: ArrivalTime) {
        let window = self.config.store_config.retention_window();
        let floor = self.config.store_config.minimum_items_to_keep;
        let total = self.shadow_total();

        if self.shadow.len() as u64 <= window.as_secs() || total <= floor {
            return;
        }
        let Some((key, ids)) = self.shadow.first_key_value() else {
            return;
        };
        let (key, size) = (*key, ids.len());
        if key.age_at(evaluated_at) > window && total - size >= floor {
            self.violation(format!(
                "reap stopped early: bucket {} ({} records) was evictable with {} stored",
                key, size, total
            ));
        }
    }

    /// Size a correct query must return, computed from the shadow model
    fn expected_len(&self, count: usize, seconds: u64) -> usize {
        let total = self.shadow_total();
        if total <= count {
            return total;
        }
        let now = self.clock.now().bucket_key();
        let start = now.back(seconds - 1);
        let in_window: usize = self.shadow.range(start..=now).map(|(_, ids)| ids.len()).sum();
        // The clock only moves forward here, so everything outside the
        // window is older and available for backfill.
        in_window.max(count)
    }

    fn check_structure(&mut self) {
        if let Err(violations) = self.store.check_invariants() {
            for v in violations {
                self.violation(format!("index: {}", v));
            }
        }
        let shadow_total = self.shadow_total();
        if self.store.len() != shadow_total {
            self.violation(format!(
                "store holds {} records, shadow holds {}",
                self.store.len(),
                shadow_total
            ));
        }
    }

    fn shadow_total(&self) -> usize {
        self.shadow.values().map(Vec::len).sum()
    }

    fn violation(&mut self, msg: String) {
        self.result.invariant_violations.push(format!(
            "seed {} op {}: {}",
            self.config.seed, self.result.total_operations, msg
        ));
    }

    /// Get the result
    pub fn result(&self) -> &StoreDSTResult {
        &self.result
    }

    /// Consume and return the result
    pub fn into_result(self) -> StoreDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> StoreDSTConfig,
) -> Vec<StoreDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        match StoreDSTHarness::new(config_fn(seed)) {
            Ok(mut harness) => {
                harness.run(ops_per_run);
                results.push(harness.into_result());
            }
            Err(e) => {
                let mut result = StoreDSTResult::new(seed);
                result
                    .invariant_violations
                    .push(format!("seed {}: invalid store config: {}", seed, e));
                results.push(result);
            }
        }
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[StoreDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_evicted: u64 = results.iter().map(|r| r.records_evicted).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} records evicted",
        passed, total, total_ops, total_evicted
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
