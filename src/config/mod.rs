//! Configuration management for mongoport
//!
//! Configuration comes from a TOML file (`--config FILE`, or
//! `~/.mongoport/config.toml` when present) with per-field defaults.
//! Command-line arguments override individual fields afterwards.
//!
//! ```toml
//! [connection]
//! uri = "mongodb://localhost:27017"
//! timeout = 30
//! retry_attempts = 3
//!
//! [transfer]
//! batch_size = 1000
//! form = "text"
//! compress = false
//! max_depth = 100
//!
//! [schema]
//! sample_size = 1000
//! format = "markdown"
//!
//! [logging]
//! level = "warn"
//! timestamps = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{DEFAULT_MAX_DEPTH, Form, MAX_DEPTH_LIMIT};
use crate::error::{ConfigError, Result};
use crate::schema::SchemaFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// MongoDB connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Connect and server selection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Number of retry attempts on connection failure
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

/// Export/import batch settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    /// Documents per batch; the unit of progress and cancellation
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Serialized form of exported files
    #[serde(default)]
    pub form: Form,

    /// Pack exports into a single archive
    #[serde(default)]
    pub compress: bool,

    /// Nesting ceiling for encoding, decoding and schema walks, at most
    /// [`MAX_DEPTH_LIMIT`]
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Schema inference settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaConfig {
    /// Documents sampled per collection
    #[serde(default = "default_sample_size")]
    pub sample_size: u64,

    #[serde(default = "default_schema_format")]
    pub format: SchemaFormat,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_batch_size() -> u32 {
    1000
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_sample_size() -> u64 {
    1000
}

fn default_schema_format() -> SchemaFormat {
    SchemaFormat::Markdown
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            form: Form::default(),
            compress: false,
            max_depth: default_max_depth(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            format: default_schema_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded and validated configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit file, or the default file when it exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::default_path();
                if path.is_file() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongoport")
            .join("config.toml")
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.connection.validate_uri()?;
        if self.transfer.batch_size == 0 {
            return Err(invalid("transfer.batch_size", 0));
        }
        if !(1..=MAX_DEPTH_LIMIT).contains(&self.transfer.max_depth) {
            return Err(invalid("transfer.max_depth", self.transfer.max_depth));
        }
        if self.schema.sample_size == 0 {
            return Err(invalid("schema.sample_size", 0));
        }
        Ok(())
    }

    /// Get connection timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout)
    }
}

fn invalid(field: &str, value: impl ToString) -> crate::error::PorterError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

impl ConnectionConfig {
    /// Check the URI scheme.
    pub fn validate_uri(&self) -> Result<()> {
        if self.uri.starts_with("mongodb://") || self.uri.starts_with("mongodb+srv://") {
            Ok(())
        } else {
            Err(invalid("connection.uri", &self.uri))
        }
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
