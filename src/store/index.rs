//! Time-bucketed record index.
//!
//! Three pieces of state form one consistency domain:
//!
//! ```text
//! keys:    [ k0 ][ k1 ][ k2 ]            first-insertion order, oldest at head
//!             │     │     │
//! buckets: { k0 → [r, r, r], k1 → [r], k2 → [r, r] }
//! total:   6                             always Σ bucket sizes
//! ```
//!
//! `BucketIndex` itself is not synchronized. Callers hold it behind one lock
//! (see `RecentStore`), which is what makes each mutating method atomic to
//! every other observer.

use super::clock::BucketKey;
use super::record::SharedRecord;
use ahash::AHashMap;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct BucketIndex {
    buckets: AHashMap<BucketKey, Vec<SharedRecord>>,
    keys: VecDeque<BucketKey>,
    total: usize,
    evicted_buckets: u64,
    evicted_records: u64,
}

impl BucketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `record` to the bucket for `key`, creating and registering the
    /// bucket on first use. Returns true when a new bucket was created.
    pub fn insert(&mut self, key: BucketKey, record: SharedRecord) -> bool {
        let mut created = false;
        self.buckets
            .entry(key)
            .or_insert_with(|| {
                created = true;
                Vec::new()
            })
            .push(record);
        if created {
            self.keys.push_back(key);
        }
        self.total += 1;
        created
    }

    /// Remove a whole bucket and its key. Returns the number of records
    /// dropped, or `None` if no such bucket exists.
    pub fn evict(&mut self, key: BucketKey) -> Option<usize> {
        let bucket = self.buckets.remove(&key)?;
        if self.keys.front() == Some(&key) {
            self.keys.pop_front();
        } else if let Some(pos) = self.keys.iter().position(|k| *k == key) {
            self.keys.remove(pos);
        }
        let removed = bucket.len();
        self.total -= removed;
        self.evicted_buckets += 1;
        self.evicted_records += removed as u64;
        Some(removed)
    }

    /// Oldest registered key (head of the key list)
    pub fn oldest_key(&self) -> Option<BucketKey> {
        self.keys.front().copied()
    }

    pub fn newest_key(&self) -> Option<BucketKey> {
        self.keys.back().copied()
    }

    pub fn bucket(&self, key: BucketKey) -> Option<&[SharedRecord]> {
        self.buckets.get(&key).map(Vec::as_slice)
    }

    /// Registered keys, oldest first
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = BucketKey> + ExactSizeIterator + '_ {
        self.keys.iter().copied()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn bucket_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn evicted_buckets(&self) -> u64 {
        self.evicted_buckets
    }

    pub fn evicted_records(&self) -> u64 {
        self.evicted_records
    }

    /// Every stored record: buckets oldest first, arrival order within each.
    pub fn all_records(&self) -> Vec<SharedRecord> {
        let mut out = Vec::with_capacity(self.total);
        for key in &self.keys {
            if let Some(bucket) = self.buckets.get(key) {
                out.extend(bucket.iter().cloned());
            }
        }
        out
    }

    /// Verify the structural invariants. Returns a description of every
    /// violation found.
    pub fn check_invariants(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        if self.keys.len() != self.buckets.len() {
            violations.push(format!(
                "key list has {} entries but {} buckets exist",
                self.keys.len(),
                self.buckets.len()
            ));
        }

        let mut seen = HashSet::with_capacity(self.keys.len());
        let mut sum = 0usize;
        for key in &self.keys {
            if !seen.insert(*key) {
                violations.push(format!("key {} registered twice", key));
            }
            match self.buckets.get(key) {
                Some(bucket) if bucket.is_empty() => {
                    violations.push(format!("bucket {} is empty", key));
                }
                Some(bucket) => sum += bucket.len(),
                None => violations.push(format!("key {} has no bucket", key)),
            }
        }

        if sum != self.total {
            violations.push(format!(
                "total count {} differs from bucket sum {}",
                self.total, sum
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Register a key with no backing bucket, breaking the invariants on
    /// purpose so failure handling can be exercised.
    #[cfg(test)]
    pub(crate) fn register_orphan_key(&mut self, key: BucketKey) {
        self.keys.push_front(key);
    }
}
