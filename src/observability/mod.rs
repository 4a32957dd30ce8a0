//! Structured logging setup
//!
//! Installs a `tracing-subscriber` fmt layer. `RUST_LOG` wins over the
//! configured filter when set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected text or json", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset (default: "info")
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Text,
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ObservabilityError {
    /// The configured filter directive does not parse
    InvalidFilter(String),
    /// A global subscriber is already installed
    AlreadyInitialized,
}

impl fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservabilityError::InvalidFilter(e) => write!(f, "invalid log filter: {}", e),
            ObservabilityError::AlreadyInitialized => {
                write!(f, "tracing subscriber already initialized")
            }
        }
    }
}

impl std::error::Error for ObservabilityError {}

fn build_filter(config: &LogConfig) -> Result<EnvFilter, ObservabilityError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| ObservabilityError::InvalidFilter(e.to_string())),
    }
}

/// Install the global subscriber
pub fn init_tracing(config: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|_| ObservabilityError::AlreadyInitialized)
}
