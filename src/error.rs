//! Custom error types for the toolkit.
//!
//! This module defines the primary error type, `DaqError`, shared by the worker
//! framework and its collaborators. Using the `thiserror` crate, it provides a
//! centralized and consistent way to describe what can go wrong on the owning
//! side of a worker: configuration problems, device and file I/O, and channel
//! teardown races.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax problems or
//!   environment overrides with the wrong type.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically
//!   incorrect (zero buffer size, unknown encoding, ...). Raised by validation.
//! - **`Io`**: Wraps standard `std::io::Error`.
//! - **`Serial`** / **`Storage`** / **`Csv`**: Collaborator-specific failures.
//! - **`ChannelClosed`**: A worker tried to report through a channel whose
//!   listener is gone while the worker was still supposed to be running.
//! - **`UnitPanicked`**: An execution unit panicked; the panic was contained.
//!
//! Errors never cross the execution-unit boundary. Inside a unit they are turned
//! into state transitions and [`ControlMessage`](crate::worker::ControlMessage)s;
//! `DaqError` is what the owning side sees.

use thiserror::Error;

/// Convenience alias for results using the toolkit error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Everything that can go wrong on the owning side of a worker.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Loading or parsing the configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but is not usable
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or device I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port enumeration or access failed
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial support was compiled out
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Output file handling failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Writing CSV failed
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The configuration could not be serialized
    #[error("Failed to serialize configuration: {0}")]
    Serialization(String),

    /// A listener went away while its worker was running
    #[error("Channel '{channel}' of worker '{worker}' closed while running")]
    ChannelClosed {
        /// Worker that attempted the send
        worker: String,
        /// Which channel was closed ("result" or "message")
        channel: &'static str,
    },

    /// An execution unit panicked; the panic was contained
    #[error("Execution unit of worker '{worker}' panicked: {reason}")]
    UnitPanicked {
        /// Worker whose unit panicked
        worker: String,
        /// Panic payload, if it was a string
        reason: String,
    },

    /// The frame store actor has exited
    #[error("Frame store is no longer running")]
    FrameStoreClosed,

    /// Installing the tracing subscriber failed
    #[error("Tracing initialization failed: {0}")]
    Tracing(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_closed_names_worker_and_channel() {
        let err = DaqError::ChannelClosed {
            worker: "reader".into(),
            channel: "result",
        };
        let text = err.to_string();
        assert!(text.contains("reader"));
        assert!(text.contains("result"));
    }

    #[test]
    fn configuration_errors_name_the_problem() {
        let err = DaqError::Configuration("buffer_size must be > 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: buffer_size must be > 0"
        );
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open_missing() -> AppResult<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here.csv")?)
        }
        match open_missing() {
            Err(DaqError::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
