//! Tracing setup for the binary and for applications embedding the workers.
//!
//! The level comes from `application.log_level` unless `RUST_LOG` is set;
//! `application.log_format` picks pretty, compact or JSON lines. Worker units
//! log inside a `unit` span carrying the worker name.
//!
//! ```no_run
//! use daq_workers::{config::DaqConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaqConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(worker = "reader", "Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::DaqConfig;
use crate::error::{AppResult, DaqError};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Line format of the console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    fn parse(format: &str) -> AppResult<Self> {
        match format.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(DaqError::Configuration(format!(
                "Invalid log format '{format}'. Must be one of: pretty, compact, json"
            ))),
        }
    }

    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer().with_thread_names(true);
        match self {
            Self::Pretty => layer.pretty().boxed(),
            Self::Compact => layer.compact().with_ansi(false).boxed(),
            Self::Json => layer.json().boxed(),
        }
    }
}

fn parse_level(level: &str) -> AppResult<Level> {
    level.parse().map_err(|_| {
        DaqError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))
    })
}

/// Install the global subscriber described by `config.application`.
///
/// A no-op when a global subscriber already exists, so tests and embedders can
/// call it freely.
pub fn init_from_config(config: &DaqConfig) -> AppResult<()> {
    let level = parse_level(&config.application.log_level)?;
    let format = LogFormat::parse(&config.application.log_format)?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::registry()
        .with(format.layer().with_filter(filter))
        .try_init()
        .map_err(|e| DaqError::Tracing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn formats_parse() {
        assert_eq!(LogFormat::parse("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("Compact").unwrap(), LogFormat::Compact);
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn bad_level_is_rejected_before_install() {
        let mut config = DaqConfig::default();
        config.application.log_level = "loud".into();
        assert!(matches!(
            init_from_config(&config),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn init_is_idempotent() {
        let mut config = DaqConfig::default();
        config.application.log_level = "error".into();
        config.application.log_format = "compact".into();
        assert!(init_from_config(&config).is_ok());
        assert!(init_from_config(&config).is_ok());
    }
}
