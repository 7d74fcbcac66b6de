//! Configuration management for the trace store.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Programmatic construction via [`ConfigBuilder`]
//! - Defaults applied once, then validation

use crate::core::{Result, TraceStoreError};
use crate::storage::codec::Encoding;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BATCH_WRITE_SIZE: usize = 1_000;
const DEFAULT_BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DATA_FILE: &str = "./tracestore.db";
const DEFAULT_INDEX_TABLE: &str = "tracestore_index";
const DEFAULT_OPERATIONS_TABLE: &str = "tracestore_operations";
const DEFAULT_SPANS_TABLE: &str = "tracestore_spans";
const DEFAULT_SPANS_ARCHIVE_TABLE: &str = "tracestore_spans_archive";

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Spans per batch; also the capacity of the writer hand-off queue
    pub batch_write_size: usize,
    /// Maximum time a partial batch waits before being flushed
    #[serde(with = "humantime_serde")]
    pub batch_flush_interval: Duration,
    /// SQLite database file
    pub data_file: PathBuf,
    /// Payload encoding for new span rows
    pub encoding: Encoding,
    /// Directory of `*.sql` scripts run once when the store opens
    pub init_sql_scripts_dir: Option<PathBuf>,
    /// Index table used by trace search
    pub index_table: String,
    /// Table (or view) listing service/operation pairs
    pub operations_table: String,
    /// Primary span table
    pub spans_table: String,
    /// Archive span table
    pub spans_archive_table: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-step search traces
    Trace,
    /// Batch and scan details
    Debug,
    /// Lifecycle events
    Info,
    /// Recoverable problems
    Warn,
    /// Failures only
    Error,
}

/// Names of the logical tables the store works against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// Primary model table
    pub spans: String,
    /// Searchable index table
    pub index: String,
    /// Service/operation listing
    pub operations: String,
    /// Archive model table
    pub spans_archive: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            batch_write_size: DEFAULT_BATCH_WRITE_SIZE,
            batch_flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            encoding: Encoding::Json,
            init_sql_scripts_dir: None,
            index_table: DEFAULT_INDEX_TABLE.to_string(),
            operations_table: DEFAULT_OPERATIONS_TABLE.to_string(),
            spans_table: DEFAULT_SPANS_TABLE.to_string(),
            spans_archive_table: DEFAULT_SPANS_ARCHIVE_TABLE.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl StorageConfig {
    /// Replaces zero sizes and empty names with their defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.batch_write_size == 0 {
            self.batch_write_size = DEFAULT_BATCH_WRITE_SIZE;
        }
        if self.batch_flush_interval.is_zero() {
            self.batch_flush_interval = DEFAULT_BATCH_FLUSH_INTERVAL;
        }
        if self.data_file.as_os_str().is_empty() {
            self.data_file = PathBuf::from(DEFAULT_DATA_FILE);
        }
        let fill = |name: &mut String, default: &str| {
            if name.is_empty() {
                *name = default.to_string();
            }
        };
        fill(&mut self.index_table, DEFAULT_INDEX_TABLE);
        fill(&mut self.operations_table, DEFAULT_OPERATIONS_TABLE);
        fill(&mut self.spans_table, DEFAULT_SPANS_TABLE);
        fill(&mut self.spans_archive_table, DEFAULT_SPANS_ARCHIVE_TABLE);
        self
    }

    /// Returns the configured table names
    pub fn tables(&self) -> TableNames {
        TableNames {
            spans: self.spans_table.clone(),
            index: self.index_table.clone(),
            operations: self.operations_table.clone(),
            spans_archive: self.spans_archive_table.clone(),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;

        if storage.batch_write_size == 0 {
            return Err(TraceStoreError::config("batch_write_size must be greater than 0"));
        }

        if storage.batch_flush_interval.is_zero() {
            return Err(TraceStoreError::config("batch_flush_interval must be greater than 0"));
        }

        let names = [
            ("index_table", &storage.index_table),
            ("operations_table", &storage.operations_table),
            ("spans_table", &storage.spans_table),
            ("spans_archive_table", &storage.spans_archive_table),
        ];

        // Table names are spliced into SQL text.
        for (field, name) in &names {
            if !is_identifier(name) {
                return Err(TraceStoreError::config(format!(
                    "{field} must be a plain SQL identifier, got {name:?}"
                )));
            }
        }

        for (i, (field, name)) in names.iter().enumerate() {
            if let Some((other, _)) = names[i + 1..].iter().find(|(_, n)| n == name) {
                return Err(TraceStoreError::config(format!(
                    "{field} and {other} must be different: both set to {name:?}"
                )));
            }
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TraceStoreError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set batch size
    pub fn batch_write_size(mut self, size: usize) -> Self {
        self.config.storage.batch_write_size = size;
        self
    }

    /// Set flush interval
    pub fn batch_flush_interval(mut self, interval: Duration) -> Self {
        self.config.storage.batch_flush_interval = interval;
        self
    }

    /// Set data file
    pub fn data_file(mut self, path: PathBuf) -> Self {
        self.config.storage.data_file = path;
        self
    }

    /// Set payload encoding
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.config.storage.encoding = encoding;
        self
    }

    /// Set init script directory
    pub fn init_sql_scripts_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.init_sql_scripts_dir = Some(path);
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Apply defaults, then build and validate the configuration
    pub fn build(mut self) -> Result<Config> {
        self.config.storage = self.config.storage.with_defaults();
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.batch_write_size, 1_000);
        assert_eq!(config.storage.batch_flush_interval, Duration::from_secs(1));
        assert_eq!(config.storage.encoding, Encoding::Json);
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = ConfigBuilder::new()
            .batch_write_size(0)
            .batch_flush_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.storage.batch_write_size, 1_000);
        assert_eq!(config.storage.batch_flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_duplicate_table_names_rejected() {
        let mut config = Config::default();
        config.storage.spans_archive_table = config.storage.spans_table.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_identifier_table_rejected() {
        let mut config = Config::default();
        config.storage.index_table = "idx; DROP TABLE x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
storage:
  batch_write_size: 250
  batch_flush_interval: 500ms
  encoding: binary
  index_table: ""
  spans_table: my_spans
logging:
  level: debug
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

        assert_eq!(config.storage.batch_write_size, 250);
        assert_eq!(config.storage.batch_flush_interval, Duration::from_millis(500));
        assert_eq!(config.storage.encoding, Encoding::Binary);
        assert_eq!(config.storage.index_table, "tracestore_index");
        assert_eq!(config.storage.spans_table, "my_spans");
        assert_eq!(config.logging.level, LogLevel::Debug);
    }
}
