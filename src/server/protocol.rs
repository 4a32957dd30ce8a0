//! JSON-lines wire protocol
//!
//! One request object per line, tagged by `op`; one response object per
//! line back.
//!
//! ```text
//! → {"op":"add","item":{"id":1,"timestamp":"2024-01-01T00:00:00Z"}}
//! ← {"status":201}
//! → {"op":"latest","count":10}
//! ← {"status":200,"count":10,"items":[...]}
//! ```

use crate::store::{Record, RecentStore, SharedRecord, StoreClock};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COUNT: i64 = 100;
pub const DEFAULT_SECONDS: i64 = 2;

const CONTRACT_MISMATCH: &str = "Invalid request data: JSON does not match the expected contract";

fn default_count() -> i64 {
    DEFAULT_COUNT
}

fn default_seconds() -> i64 {
    DEFAULT_SECONDS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Add {
        #[serde(default)]
        item: Option<Record>,
    },
    Latest {
        #[serde(default = "default_count")]
        count: i64,
        #[serde(default = "default_seconds")]
        seconds: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Created {
        status: u16,
    },
    Items {
        status: u16,
        count: usize,
        items: Vec<SharedRecord>,
    },
    Error {
        status: u16,
        message: String,
    },
}

impl Response {
    pub fn created() -> Self {
        Response::Created { status: 201 }
    }

    pub fn items(items: Vec<SharedRecord>) -> Self {
        Response::Items {
            status: 200,
            count: items.len(),
            items,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Response::Error {
            status: 400,
            message: message.into(),
        }
    }

    pub fn too_large(limit: usize) -> Self {
        Response::Error {
            status: 413,
            message: format!("request line exceeds {} bytes", limit),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Response::Created { status }
            | Response::Items { status, .. }
            | Response::Error { status, .. } => *status,
        }
    }

    /// Append this response plus a trailing newline to `out`
    pub fn encode_into(&self, out: &mut BytesMut) {
        let mut writer = out.writer();
        if serde_json::to_writer(&mut writer, self).is_err() {
            // Only reachable if a payload fails to serialize
            writer
                .get_mut()
                .put_slice(br#"{"status":500,"message":"failed to encode response"}"#);
        }
        writer.into_inner().put_u8(b'\n');
    }
}

/// Decode one request line (without its newline)
pub fn parse_request(line: &[u8]) -> Result<Request, Response> {
    serde_json::from_slice(line).map_err(|e| Response::bad_request(format!("malformed request: {}", e)))
}

/// Apply a request to the store
pub fn execute<C: StoreClock>(store: &RecentStore<C>, request: Request) -> Response {
    match request {
        Request::Add { item: Some(record) } => {
            store.add(record);
            Response::created()
        }
        Request::Add { item: None } => Response::bad_request(CONTRACT_MISMATCH),
        Request::Latest { count, seconds } => match store.latest(count, seconds) {
            Ok(items) => Response::items(items),
            Err(e) => Response::bad_request(e.to_string()),
        },
    }
}
