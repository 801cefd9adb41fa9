//! Out-of-band control messages and the channel ends held by an execution unit.

use super::state::{SharedState, WorkerState};
use crate::error::{AppResult, DaqError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Status events a unit reports to its owner, separate from results so that
/// status and data never interleave on one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ControlMessage {
    /// A device was opened
    Connected {
        /// Port or device identifier
        device: String,
    },
    /// A device could not be opened; the unit has stopped itself
    ConnectFailed {
        /// Port or device identifier
        device: String,
        /// Underlying error text
        reason: String,
    },
    /// An open device failed mid-run; the unit has stopped itself
    DeviceLost {
        /// Underlying error text
        reason: String,
    },
    /// An output file was created
    Opened {
        /// Path of the new file
        path: PathBuf,
    },
    /// Output could not be created or written; the unit has stopped itself
    StorageFailed {
        /// Underlying error text
        reason: String,
    },
    /// The unit panicked. The panic was contained and the worker is stopped.
    Panicked {
        /// Panic payload if it was a string
        reason: String,
    },
    /// The unit ran `on_stop` and exited
    Exited,
    /// Free-form status text
    Status(String),
}

/// Sending half of a per-run channel, aware of the worker's lifecycle.
///
/// A failed send while the worker is stopped is the expected teardown race and
/// is ignored. A failed send while the worker should be running is surfaced.
pub(crate) struct ChannelSender<T> {
    tx: mpsc::UnboundedSender<T>,
    state: SharedState,
    worker: Arc<str>,
    channel: &'static str,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state: self.state.clone(),
            worker: Arc::clone(&self.worker),
            channel: self.channel,
        }
    }
}

impl<T> ChannelSender<T> {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<T>,
        state: SharedState,
        worker: Arc<str>,
        channel: &'static str,
    ) -> Self {
        Self {
            tx,
            state,
            worker,
            channel,
        }
    }

    pub(crate) fn send(&self, value: T) -> AppResult<()> {
        match self.tx.send(value) {
            Ok(()) => Ok(()),
            Err(_) if self.state.is_stopped() => {
                debug!(
                    worker = %self.worker,
                    channel = self.channel,
                    "Dropped send on closed channel during shutdown"
                );
                Ok(())
            }
            Err(_) => {
                error!(
                    worker = %self.worker,
                    channel = self.channel,
                    "Channel closed while worker is running"
                );
                Err(DaqError::ChannelClosed {
                    worker: self.worker.to_string(),
                    channel: self.channel,
                })
            }
        }
    }
}

/// What a hook can see of its worker from inside the execution unit: the
/// state flag and the message channel.
#[derive(Clone)]
pub struct UnitControl {
    worker: Arc<str>,
    state: SharedState,
    messages: ChannelSender<ControlMessage>,
}

impl UnitControl {
    pub(crate) fn new(
        worker: Arc<str>,
        state: SharedState,
        messages: ChannelSender<ControlMessage>,
    ) -> Self {
        Self {
            worker,
            state,
            messages,
        }
    }

    /// Name of the owning worker, for logging.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Current state snapshot.
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Whether the unit has been asked to exit.
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Ask the loop to exit at its next iteration boundary.
    pub fn set_stopped(&self) {
        self.state.set(WorkerState::Stopped);
    }

    pub(crate) fn shared_state(&self) -> &SharedState {
        &self.state
    }

    /// Report a status event to the owner.
    ///
    /// If the owner stopped listening while the worker is still running, the
    /// unit stops itself.
    pub fn send(&self, message: ControlMessage) {
        if self.messages.send(message).is_err() {
            self.set_stopped();
        }
    }

    /// Report an unrecoverable fault and stop the unit.
    pub fn fail(&self, message: ControlMessage) {
        warn!(worker = %self.worker, ?message, "Worker fault, stopping");
        // Send before stopping so the message is not mistaken for a teardown race.
        self.send(message);
        self.set_stopped();
    }
}
