//! Hybrid count-or-seconds query.
//!
//! Answers "most recent activity": everything that arrived in the last
//! `seconds` seconds, topped up with older records until at least `count`
//! are returned.
//!
//! ## Result layout
//!
//! ```text
//! [ window: oldest second .. now ][ backfill: newest older bucket .. partial oldest ]
//! ```
//!
//! Each segment is ordered internally, but the result as a whole is NOT
//! sorted by time: backfilled buckets come after the window and walk
//! backwards. Treat it as a bag of recent records.

use super::clock::BucketKey;
use super::error::StoreError;
use super::index::BucketIndex;
use super::record::SharedRecord;

/// Validated query arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentQuery {
    count: usize,
    seconds: u64,
}

impl RecentQuery {
    /// Both arguments must be positive; anything else is rejected rather
    /// than clamped.
    pub fn new(count: i64, seconds: i64) -> Result<Self, StoreError> {
        if count <= 0 {
            return Err(StoreError::InvalidArgument {
                name: "count",
                value: count,
            });
        }
        if seconds <= 0 {
            return Err(StoreError::InvalidArgument {
                name: "seconds",
                value: seconds,
            });
        }
        Ok(RecentQuery {
            // Saturate where usize is narrower than i64
            count: usize::try_from(count).unwrap_or(usize::MAX),
            seconds: seconds as u64,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }
}

/// Run the query against `index` with `now` as the current bucket.
///
/// The caller must hold the index lock for the whole call; that is what
/// serializes the read of the "now" bucket against concurrent inserts.
pub fn collect_recent(index: &BucketIndex, now: BucketKey, query: &RecentQuery) -> Vec<SharedRecord> {
    if index.total() <= query.count {
        return index.all_records();
    }

    let window_start = now.back(query.seconds - 1);
    let mut result = Vec::new();
    for key in window_keys(index, window_start, now) {
        if let Some(bucket) = index.bucket(key) {
            result.extend(bucket.iter().cloned());
        }
    }

    if result.len() >= query.count {
        return result;
    }

    let mut remaining = query.count - result.len();
    for key in index.keys().rev().filter(|k| *k < window_start) {
        let Some(bucket) = index.bucket(key) else {
            continue;
        };
        if bucket.len() <= remaining {
            result.extend(bucket.iter().cloned());
            remaining -= bucket.len();
            if remaining == 0 {
                break;
            }
        } else {
            // Keep only the newest `remaining` records of this bucket
            result.extend(bucket[bucket.len() - remaining..].iter().cloned());
            break;
        }
    }

    result
}

/// Keys in `[start, now]`, oldest first.
///
/// Short windows probe every second directly. Windows wider than the number
/// of live buckets filter the key list instead, so a huge `seconds` argument
/// costs no more than a full scan.
fn window_keys(index: &BucketIndex, start: BucketKey, now: BucketKey) -> Vec<BucketKey> {
    let span = now.as_secs() - start.as_secs() + 1;
    if span <= index.bucket_count() as u64 {
        (start.as_secs()..=now.as_secs()).map(BucketKey::from_secs).collect()
    } else {
        let mut keys: Vec<BucketKey> = index
            .keys()
            .filter(|k| *k >= start && *k <= now)
            .collect();
        keys.sort_unstable();
        keys
    }
}
