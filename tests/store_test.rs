//! Record store behaviour through the public API
//!
//! Time is driven by `SimulatedClock`; reaper scheduling uses tokio's paused
//! clock so interval ticks are deterministic.

use recent_activity::{Record, RecentStore, SharedRecord, SimulatedClock, StoreConfig};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

const START_MS: u64 = 1_700_000_000_000;

fn detached_store(config: StoreConfig) -> RecentStore<SimulatedClock> {
    RecentStore::detached(config, SimulatedClock::new(START_MS)).unwrap()
}

fn add_batch(store: &RecentStore<SimulatedClock>, next_id: &mut i64, n: usize) {
    for _ in 0..n {
        store.add(Record::new(*next_id, format!("ts-{}", next_id)));
        *next_id += 1;
    }
}

fn ids(records: &[SharedRecord]) -> Vec<i64> {
    records.iter().map(|r| r.id).collect()
}

// =============================================================================
// Query properties
// =============================================================================

#[test]
fn test_everything_returned_when_below_count() {
    let store = detached_store(StoreConfig::default());
    let mut next_id = 0;
    for (n, gap_ms) in [(7, 300), (0, 1_200), (12, 2_500), (1, 0), (30, 900)] {
        add_batch(&store, &mut next_id, n);
        store.clock().advance_ms(gap_ms);
    }

    let result = store.latest(100, 1).unwrap();
    assert_eq!(ids(&result), (0..next_id).collect::<Vec<_>>());
}

#[test]
fn test_burst_in_one_second_returned_whole() {
    let store = detached_store(StoreConfig::default());
    let mut next_id = 0;
    add_batch(&store, &mut next_id, 101);

    assert_eq!(store.latest(100, 2).unwrap().len(), 101);
}

#[test]
fn test_window_spanning_two_seconds_merges_both() {
    let store = detached_store(StoreConfig::default());
    let mut next_id = 0;
    add_batch(&store, &mut next_id, 101);
    store.clock().advance(Duration::from_secs(1));
    add_batch(&store, &mut next_id, 101);

    let result = store.latest(100, 2).unwrap();
    assert_eq!(result.len(), 202);
    assert_eq!(store.stats().bucket_count, 2);
}

#[test]
fn test_partial_backfill_to_count() {
    let store = detached_store(StoreConfig::default());
    let mut next_id = 0;
    add_batch(&store, &mut next_id, 50);
    store.clock().advance(Duration::from_secs(1));
    add_batch(&store, &mut next_id, 30);
    store.clock().advance(Duration::from_secs(1));
    add_batch(&store, &mut next_id, 40);

    let result = store.latest(100, 2).unwrap();
    assert_eq!(result.len(), 100);

    // Two newest seconds whole, in arrival order
    assert_eq!(ids(&result[..70]), (50..120).collect::<Vec<_>>());
    // Newest 30 of the oldest bucket, still in arrival order
    assert_eq!(ids(&result[70..]), (20..50).collect::<Vec<_>>());
}

#[test]
fn test_back_to_back_queries_identical() {
    let store = detached_store(StoreConfig::default());
    let mut next_id = 0;
    for _ in 0..6 {
        add_batch(&store, &mut next_id, 33);
        store.clock().advance_ms(700);
    }

    for (count, seconds) in [(10, 1), (100, 2), (150, 3), (500, 60)] {
        let first = store.latest(count, seconds).unwrap();
        let second = store.latest(count, seconds).unwrap();
        assert_eq!(ids(&first), ids(&second));

        let unique: HashSet<i64> = ids(&first).into_iter().collect();
        assert_eq!(unique.len(), first.len(), "duplicate records returned");
    }
}

#[test]
fn test_payload_round_trip_and_position() {
    let store = detached_store(StoreConfig::default());
    let payload = json!({"user": "ana", "tags": ["a", "b"], "score": 4.5, "nested": {"ok": true}});

    store.add(Record::new(1, "first"));
    store.add(Record::new(2, "second").with_payload(payload.clone()));
    store.add(Record::new(3, "third"));

    let result = store.latest(10, 1).unwrap();
    assert_eq!(ids(&result), vec![1, 2, 3]);
    assert_eq!(result[1].timestamp, "second");
    assert_eq!(result[1].payload, payload);
}

#[test]
fn test_empty_store_and_bad_arguments() {
    let store = detached_store(StoreConfig::default());
    assert!(store.latest(100, 2).unwrap().is_empty());
    assert!(store.latest(-5, 2).is_err());
    assert!(store.latest(5, -2).is_err());
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_reap_respects_floor_and_window() {
    let config = StoreConfig {
        retention_window_secs: 2,
        minimum_items_to_keep: 100,
        cleanup_interval_secs: 1,
    };
    let store = detached_store(config);
    let mut next_id = 0;
    for n in [150, 100, 70, 40] {
        add_batch(&store, &mut next_id, n);
        store.clock().advance(Duration::from_secs(1));
    }
    store.clock().advance(Duration::from_secs(10));

    let report = store.reap_now().unwrap();
    assert_eq!(report.total_before, 360);
    assert_eq!(report.records_removed(), 250);
    assert!(report.total_after >= 100);
    for (key, _) in &report.evicted {
        assert!(key.age_at(report.evaluated_at) > Duration::from_secs(2));
    }

    assert_eq!(store.latest(200, 2).unwrap().len(), 110);
    assert!(store.check_invariants().is_ok());
}

#[test]
fn test_reap_never_takes_young_buckets() {
    let config = StoreConfig {
        retention_window_secs: 5,
        minimum_items_to_keep: 0,
        cleanup_interval_secs: 1,
    };
    let store = detached_store(config);
    let mut next_id = 0;
    for _ in 0..10 {
        add_batch(&store, &mut next_id, 10);
        store.clock().advance(Duration::from_secs(1));
    }

    let report = store.reap_now().unwrap();
    for (key, _) in &report.evicted {
        assert!(key.age_at(report.evaluated_at) > Duration::from_secs(5));
    }
    let stats = store.stats();
    assert_eq!(stats.bucket_count, 5);
    assert_eq!(stats.total_records, 50);
}

#[test]
fn test_concurrent_producers_keep_index_consistent() {
    let store = detached_store(StoreConfig::default());

    std::thread::scope(|s| {
        for t in 0..8i64 {
            let store = &store;
            s.spawn(move || {
                for i in 0..1_000 {
                    store.add(Record::new(t * 1_000 + i, "concurrent"));
                    if i % 250 == 0 {
                        store.clock().advance_ms(400);
                    }
                }
            });
        }
        s.spawn(|| {
            for _ in 0..200 {
                let _ = store.latest(100, 2).unwrap();
            }
        });
    });

    assert_eq!(store.len(), 8_000);
    assert!(store.check_invariants().is_ok());
    let all = store.latest(10_000, 1).unwrap();
    let unique: HashSet<i64> = ids(&all).into_iter().collect();
    assert_eq!(unique.len(), 8_000);
}

// =============================================================================
// Background reaper
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_background_reaper_evicts_after_one_period() {
    let store = RecentStore::start(StoreConfig::test(), SimulatedClock::new(START_MS)).unwrap();
    let mut next_id = 0;
    for n in [150, 100, 70, 40] {
        add_batch(&store, &mut next_id, n);
        store.clock().advance(Duration::from_secs(1));
    }
    store.clock().advance(Duration::from_secs(10));

    // Nothing happens before the first full period
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.len(), 360);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(store.latest(200, 2).unwrap().len(), 110);
    assert_eq!(store.stats().evicted_records, 250);

    store.shutdown().await;
    assert!(!store.reaper_running());
}

#[tokio::test(start_paused = true)]
async fn test_below_floor_nothing_evicted() {
    let store = RecentStore::start(StoreConfig::test(), SimulatedClock::new(START_MS)).unwrap();
    let mut next_id = 0;
    add_batch(&store, &mut next_id, 50);
    assert_eq!(store.latest(100, 2).unwrap().len(), 50);

    store.clock().advance(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(store.latest(100, 2).unwrap().len(), 50);
    assert_eq!(store.stats().evicted_buckets, 0);

    store.shutdown().await;
}
