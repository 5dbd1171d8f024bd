//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::{CompactionPolicy, LogSettings, WriterOptions};
use crate::store::StoreConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log file configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Collect writes for `flush_debounce_ms` before appending
    #[serde(default = "default_batching")]
    pub batching: bool,

    #[serde(default = "default_flush_debounce")]
    pub flush_debounce_ms: u64,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Unset = retry failed appends forever
    #[serde(default)]
    pub max_write_retries: Option<u32>,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("entitydb").to_string_lossy().to_string())
        .unwrap_or_else(|| "./entitydb_data".to_string())
}

fn default_batching() -> bool {
    true
}

fn default_flush_debounce() -> u64 {
    500
}

fn default_retry_backoff() -> u64 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            batching: default_batching(),
            flush_debounce_ms: default_flush_debounce(),
            retry_backoff_ms: default_retry_backoff(),
            max_write_retries: None,
        }
    }
}

/// Log compaction trigger
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,

    #[serde(default = "default_min_deletes")]
    pub min_deletes: u64,
}

fn default_min_ratio() -> f64 {
    0.2
}

fn default_min_deletes() -> u64 {
    1000
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_ratio: default_min_ratio(),
            min_deletes: default_min_deletes(),
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_contains_index")]
    pub contains_index: bool,
}

fn default_contains_index() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            contains_index: default_contains_index(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("entitydb").join("config.toml")),
            Some(PathBuf::from("/etc/entitydb/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Runtime settings for `EntityStore::open`
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: PathBuf::from(&self.storage.data_dir),
            log: LogSettings {
                writer: WriterOptions {
                    batching: self.storage.batching,
                    debounce: Duration::from_millis(self.storage.flush_debounce_ms),
                    retry_backoff: Duration::from_millis(self.storage.retry_backoff_ms),
                    max_retries: self.storage.max_write_retries,
                },
                compaction: CompactionPolicy {
                    min_ratio: self.compaction.min_ratio,
                    min_deletes: self.compaction.min_deletes,
                },
            },
            contains_index: self.search.contains_index,
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(data_dir) = lookup("ENTITYDB_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(batching) = lookup("ENTITYDB_BATCHING") {
            match batching.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.storage.batching = true,
                "0" | "false" | "no" | "off" => self.storage.batching = false,
                other => tracing::warn!("Ignoring ENTITYDB_BATCHING={}", other),
            }
        }

        if let Some(level) = lookup("ENTITYDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("ENTITYDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    let data_dir = toml::Value::String(default_data_dir());
    let template = r#"# entitydb Configuration
#
# Environment variables override these settings:
# - ENTITYDB_DATA_DIR
# - ENTITYDB_BATCHING
# - ENTITYDB_LOG_LEVEL
# - ENTITYDB_LOG_FORMAT

[storage]
# Directory for the log files and blobs
data_dir = {data_dir}

# Collect writes and append them in one batch
batching = true

# How long to collect writes before appending (ms)
flush_debounce_ms = 500

# Pause between failed append attempts (ms)
retry_backoff_ms = 100

# Give up after this many failed attempts (unset = retry forever)
# max_write_retries = 50

[compaction]
# Rewrite a log at startup when deletes / inserts exceeds this ratio...
min_ratio = 0.2

# ...and it holds more than this many deletes
min_deletes = 1000

[search]
# Keep a word index for prop:name~value queries
contains_index = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#;
    template.replace("{data_dir}", &data_dir.to_string())
}
