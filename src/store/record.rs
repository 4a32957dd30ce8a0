use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One ingested record.
///
/// The store only carries these fields. `timestamp` is whatever the caller
/// sent; bucketing uses the arrival time observed by the store instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(id: i64, timestamp: impl Into<String>) -> Self {
        Record {
            id,
            timestamp: timestamp.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Records are immutable once stored, so buckets and query results share them.
pub type SharedRecord = Arc<Record>;
