/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Non-positive `count` or `seconds` passed to a query
    InvalidArgument { name: &'static str, value: i64 },
    /// A reaper tick failed; the loop keeps running
    EvictionFailed(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidArgument { name, value } => {
                write!(f, "invalid argument: {} must be positive, got {}", name, value)
            }
            StoreError::EvictionFailed(msg) => write!(f, "eviction failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}
