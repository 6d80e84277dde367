//! Configuration module for Flowtrack.
//!
//! Typed configuration structs mapping to the YAML configuration file,
//! with loading, validation, and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Flowtrack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub source: SourceConfig,
    pub remote: RemoteConfig,
    pub privacy: PrivacyConfig,
    pub logging: LoggingConfig,
}

/// Synchronization cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between live sync cycles.
    pub interval_seconds: u64,
    /// Seconds between retry-drain passes over the offline queue.
    pub drain_interval_seconds: u64,
    /// Maximum events per outbound batch.
    pub batch_size: u32,
    /// Maximum drained batches per retry pass.
    pub max_batches_per_drain: u32,
    /// Hours of history to backfill on the first sync of a bucket.
    pub backfill_hours: u32,
}

/// Offline queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Days after which an undelivered event is expired and dropped.
    pub retention_days: u32,
    /// Hard ceiling on queued events; oldest rows are evicted beyond it.
    pub max_queue_size: u32,
    /// Attempt count past which an item is flagged as persistently failing.
    pub max_attempts: u32,
}

/// Retry backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Initial delay in seconds.
    pub base_delay_seconds: u64,
    /// Delay ceiling in seconds.
    pub max_delay_seconds: u64,
}

/// Local activity source connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl SourceConfig {
    /// Base URL of the source's HTTP API.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Remote ingestion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the agent-facing ingestion API.
    pub api_url: String,
    /// Bearer token; supplied by the operator, renewable out of band.
    pub api_token: Option<String>,
    /// Device id assigned at registration.
    pub device_id: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

/// Privacy transformation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Hash window titles before they leave the machine.
    pub hash_titles: bool,
    /// Apps whose raw titles may pass through unhashed.
    pub title_allowlist: Vec<String>,
    /// Truncate URLs to their domain.
    pub domain_only_urls: bool,
    /// Apps excluded from tracking entirely.
    pub exclude_apps: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/flowtrack/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("flowtrack")
            .join("config.yaml")
    }

    /// Platform-appropriate path for the durable queue database.
    pub fn default_db_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowtrack")
            .join("queue.db")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            drain_interval_seconds: 30,
            batch_size: 100,
            max_batches_per_drain: 10,
            backfill_hours: 24,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_queue_size: 100_000,
            max_attempts: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 1,
            max_delay_seconds: 60,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5600,
            timeout_seconds: 10,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://app.flowtrack.dev/api/agent".to_string(),
            api_token: None,
            device_id: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            hash_titles: true,
            title_allowlist: vec![
                "Visual Studio Code".to_string(),
                "IntelliJ IDEA".to_string(),
                "Terminal".to_string(),
                "iTerm2".to_string(),
                "Windows Terminal".to_string(),
            ],
            domain_only_urls: true,
            exclude_apps: vec![
                "1Password".to_string(),
                "Keychain Access".to_string(),
                "System Preferences".to_string(),
                "System Settings".to_string(),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_seconds"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Ceiling enforced on `sync.batch_size` regardless of configuration.
pub const MAX_BATCH_SIZE: u32 = 1000;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sync.interval_seconds < 30 {
            errors.push(ValidationError {
                field: "sync.interval_seconds".into(),
                message: "must be at least 30".into(),
            });
        }
        if self.sync.drain_interval_seconds == 0 {
            errors.push(ValidationError {
                field: "sync.drain_interval_seconds".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.batch_size == 0 || self.sync.batch_size > MAX_BATCH_SIZE {
            errors.push(ValidationError {
                field: "sync.batch_size".into(),
                message: format!("must be between 1 and {MAX_BATCH_SIZE}"),
            });
        }
        if self.queue.retention_days == 0 {
            errors.push(ValidationError {
                field: "queue.retention_days".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.retry.base_delay_seconds == 0 {
            errors.push(ValidationError {
                field: "retry.base_delay_seconds".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.retry.max_delay_seconds < self.retry.base_delay_seconds {
            errors.push(ValidationError {
                field: "retry.max_delay_seconds".into(),
                message: "must be at least retry.base_delay_seconds".into(),
            });
        }
        if self.remote.api_url.is_empty() {
            errors.push(ValidationError {
                field: "remote.api_url".into(),
                message: "must not be empty".into(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!("must be one of {VALID_LOG_LEVELS:?}"),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validation_catches_bad_fields() {
        let mut config = Config::default();
        config.sync.interval_seconds = 5;
        config.sync.batch_size = 0;
        config.logging.level = "noisy".to_string();

        let errors = config.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"sync.interval_seconds"));
        assert!(fields.contains(&"sync.batch_size"));
        assert!(fields.contains(&"logging.level"));
    }

    #[test]
    fn test_load_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "sync:\n  interval_seconds: 120\nremote:\n  api_url: https://example.test/api\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync.interval_seconds, 120);
        assert_eq!(config.remote.api_url, "https://example.test/api");
        // Untouched sections keep their defaults
        assert_eq!(config.sync.batch_size, 100);
        assert!(config.privacy.hash_titles);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/flowtrack.yaml"));
        assert_eq!(config.sync.interval_seconds, 60);
    }

    #[test]
    fn test_source_base_url() {
        let source = SourceConfig::default();
        assert_eq!(source.base_url(), "http://localhost:5600");
    }
}
