//! Configuration System using Figment
//!
//! Strongly-typed configuration for workers and their collaborators.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `DAQ_`, `__` separates nested keys)
//!
//! Durations use humantime notation (`"250ms"`, `"10s"`).
//!
//! # Example
//! ```no_run
//! use daq_workers::config::DaqConfig;
//!
//! let config = DaqConfig::load_from("config/daq_workers.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), daq_workers::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use chrono::format::{Item, StrftimeItems};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/daq_workers.toml";

/// Column name that receives the frame timestamp when recording.
pub const TIME_COLUMN: &str = "Time";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Worker loop settings
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Line-oriented device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Recording settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Timing and sizing of worker loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between polls of an idle loop
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Minimum spacing between producer iterations (0 = unthrottled)
    #[serde(with = "humantime_serde", default)]
    pub work_timeout: Duration,
    /// Number of queued items that triggers a consumer batch
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum time a consumer waits before processing whatever is queued
    #[serde(with = "humantime_serde", default = "default_buffer_timeout")]
    pub buffer_timeout: Duration,
    /// Capacity of every consumer inbox; offers beyond it are dropped
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

/// Serial device settings, handed to a reader's `on_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Time a single read may block before yielding back to the loop
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
    /// Byte that terminates one frame
    #[serde(default = "default_terminator")]
    pub terminator: char,
    /// Text encoding of frames (utf-8, ascii, latin-1)
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// If set, frames not starting with this character are dropped
    #[serde(default)]
    pub frame_start_char: Option<char>,
}

/// CSV recording settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory, created on demand
    pub directory: PathBuf,
    /// chrono format string for the file name prefix
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Suffix used when the caller passes an empty one
    #[serde(default = "default_suffix")]
    pub default_suffix: String,
    /// File extension including the dot
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Field delimiter (single byte)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Header row; frame tags map onto these columns
    pub columns: Vec<String>,
    /// `raw` for seconds since the epoch, a chrono format string, or none
    #[serde(default)]
    pub timestamp_format: Option<String>,
}

// Default value functions
fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1)
}

fn default_buffer_size() -> usize {
    1
}

fn default_buffer_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_inbox_capacity() -> usize {
    1024
}

fn default_baud() -> u32 {
    115_200
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_terminator() -> char {
    '\n'
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%dT%H_%M".to_string()
}

fn default_suffix() -> String {
    "data".to_string()
}

fn default_extension() -> String {
    ".csv".to_string()
}

fn default_delimiter() -> char {
    ','
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "DAQ Workers".to_string(),
            log_level: "info".to_string(),
            log_format: default_log_format(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            work_timeout: Duration::ZERO,
            buffer_size: default_buffer_size(),
            buffer_timeout: default_buffer_timeout(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            baud: default_baud(),
            read_timeout: default_read_timeout(),
            terminator: default_terminator(),
            encoding: default_encoding(),
            frame_start_char: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            date_format: default_date_format(),
            default_suffix: default_suffix(),
            extension: default_extension(),
            delimiter: default_delimiter(),
            columns: vec![TIME_COLUMN.to_string()],
            timestamp_format: Some(RAW_TIMESTAMP.to_string()),
        }
    }
}

/// `storage.timestamp_format` value selecting seconds since the Unix epoch.
pub const RAW_TIMESTAMP: &str = "raw";

fn is_valid_time_format(format: &str) -> bool {
    !format.is_empty()
        && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Encodings a reader knows how to decode.
pub const SUPPORTED_ENCODINGS: [&str; 3] = ["utf-8", "ascii", "latin-1"];

impl DaqConfig {
    /// Load configuration from the default path and environment variables
    ///
    /// Environment variables override file values with prefix `DAQ_`.
    /// Example: `DAQ_WORKERS__BUFFER_SIZE=50`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Missing keys fall back to the defaults; a missing file yields the defaults
    /// with environment overrides applied.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(DaqConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Load the file at `path`, writing the defaults there first if it is missing.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            DaqConfig::default().save(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
        }
        Self::load_from(path)
    }

    /// Serialize this configuration to `path` as TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text =
            toml::to_string_pretty(self).map_err(|e| DaqError::Serialization(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.workers.buffer_size == 0 {
            return Err(DaqError::Configuration(
                "workers.buffer_size must be at least 1".to_string(),
            ));
        }

        if self.workers.inbox_capacity == 0 {
            return Err(DaqError::Configuration(
                "workers.inbox_capacity must be at least 1".to_string(),
            ));
        }

        if !SUPPORTED_ENCODINGS.contains(&self.device.encoding.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid encoding '{}'. Must be one of: {}",
                self.device.encoding,
                SUPPORTED_ENCODINGS.join(", ")
            )));
        }

        if !self.device.terminator.is_ascii() {
            return Err(DaqError::Configuration(
                "device.terminator must be a single ASCII character".to_string(),
            ));
        }

        if !self.storage.delimiter.is_ascii() {
            return Err(DaqError::Configuration(
                "storage.delimiter must be a single ASCII character".to_string(),
            ));
        }

        if self.storage.columns.is_empty() {
            return Err(DaqError::Configuration(
                "storage.columns must name at least one column".to_string(),
            ));
        }

        if self.storage.default_suffix.chars().any(std::path::is_separator) {
            return Err(DaqError::Configuration(format!(
                "storage.default_suffix '{}' must not contain a path separator",
                self.storage.default_suffix
            )));
        }

        if !is_valid_time_format(&self.storage.date_format) {
            return Err(DaqError::Configuration(format!(
                "Invalid storage.date_format '{}'",
                self.storage.date_format
            )));
        }

        if let Some(format) = self.storage.timestamp_format.as_deref() {
            if format != RAW_TIMESTAMP && !is_valid_time_format(format) {
                return Err(DaqError::Configuration(format!(
                    "Invalid storage.timestamp_format '{}'. Use \"{}\" or a strftime format",
                    format, RAW_TIMESTAMP
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.storage.columns {
            if !seen.insert(column) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate storage column: {}",
                    column
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(DaqConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daq.toml");
        std::fs::write(
            &path,
            r#"
            [workers]
            buffer_size = 3
            buffer_timeout = "10s"

            [storage]
            directory = "out"
            columns = ["Time", "EIT", "Flow1"]
            "#,
        )
        .unwrap();

        let config = DaqConfig::load_from(&path).unwrap();
        assert_eq!(config.workers.buffer_size, 3);
        assert_eq!(config.workers.buffer_timeout, Duration::from_secs(10));
        assert_eq!(config.workers.inbox_capacity, 1024);
        assert_eq!(config.storage.columns.len(), 3);
        assert_eq!(config.storage.extension, ".csv");
        assert_eq!(config.application.log_level, "info");
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daq.toml");

        let config = DaqConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.workers.buffer_size, 1);

        let reloaded = DaqConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.storage, config.storage);
        assert_eq!(reloaded.device, config.device);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DaqConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let mut config = DaqConfig::default();
        config.workers.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let mut config = DaqConfig::default();
        config.device.encoding = "ebcdic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let mut config = DaqConfig::default();
        config.storage.columns = vec!["Time".into(), "EIT".into(), "EIT".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("EIT"));
    }

    #[test]
    fn test_bad_time_formats_rejected() {
        let mut config = DaqConfig::default();
        config.storage.timestamp_format = Some("%Y-%m-%d %H:%M:%S%.3f".into());
        assert!(config.validate().is_ok());

        config.storage.timestamp_format = Some("%Q".into());
        assert!(config.validate().is_err());

        config.storage.timestamp_format = None;
        config.storage.date_format = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_suffix_is_a_plain_name() {
        let mut config = DaqConfig::default();
        config.storage.default_suffix = "../elsewhere".into();
        assert!(config.validate().is_err());
    }
}
