//! Application configuration
//!
//! Loaded in layers: defaults, then an optional TOML file, then `RECENT_*`
//! environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | RECENT_LISTEN_ADDR | `listen_addr` |
//! | RECENT_RETENTION_WINDOW_SECS | `store.retention_window_secs` |
//! | RECENT_MINIMUM_ITEMS_TO_KEEP | `store.minimum_items_to_keep` |
//! | RECENT_CLEANUP_INTERVAL_SECS | `store.cleanup_interval_secs` |
//! | RECENT_LOG_FORMAT | `log.format` (`text` or `json`) |
//! | RECENT_LOG_FILTER | `log.filter` |

use crate::observability::{LogConfig, LogFormat};
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Top-level configuration for the server binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// TCP address to accept clients on (default: 127.0.0.1:5000)
    pub listen_addr: SocketAddr,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file plus the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::load`] with an explicit environment lookup
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => AppConfig::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay `RECENT_*` variables. A variable that is set but does not
    /// parse is an error.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = parse_var(&lookup, "RECENT_LISTEN_ADDR", "listen_addr")? {
            self.listen_addr = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "RECENT_RETENTION_WINDOW_SECS",
            "store.retention_window_secs",
        )? {
            self.store.retention_window_secs = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "RECENT_MINIMUM_ITEMS_TO_KEEP",
            "store.minimum_items_to_keep",
        )? {
            self.store.minimum_items_to_keep = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "RECENT_CLEANUP_INTERVAL_SECS",
            "store.cleanup_interval_secs",
        )? {
            self.store.cleanup_interval_secs = v;
        }
        if let Some(v) = parse_var::<LogFormat>(&lookup, "RECENT_LOG_FORMAT", "log.format")? {
            self.log.format = v;
        }
        if let Some(v) = lookup("RECENT_LOG_FILTER") {
            self.log.filter = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    field: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                field,
                reason: format!("{}={:?}: {}", name, raw, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:5000");
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_toml_file_then_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen_addr = "0.0.0.0:7000"

[store]
retention_window_secs = 10
minimum_items_to_keep = 5

[log]
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_with(
            Some(file.path()),
            env(&[("RECENT_MINIMUM_ITEMS_TO_KEEP", "50"), ("RECENT_LOG_FILTER", "debug")]),
        )
        .unwrap();

        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.store.retention_window_secs, 10);
        assert_eq!(config.store.minimum_items_to_keep, 50);
        assert_eq!(config.store.cleanup_interval_secs, 5);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "debug");
    }

    #[test]
    fn test_unparseable_override_is_an_error() {
        let err = AppConfig::load_with(None, env(&[("RECENT_CLEANUP_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "store.cleanup_interval_secs", .. }
        ));

        let err = AppConfig::load_with(None, env(&[("RECENT_LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "log.format", .. }));
    }

    #[test]
    fn test_validation_runs_after_overrides() {
        let err = AppConfig::load_with(None, env(&[("RECENT_RETENTION_WINDOW_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "retention_window_secs", .. }
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_with(Some(&dir.path().join("absent.toml")), env(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = AppConfig::from_toml("store = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
