//! Lifecycle state shared between a worker's owner and its execution unit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Worker lifecycle state.
///
/// ```text
/// Stopped --start_new--> Started --set_stopped--> Stopped
///                        Started --set_stop_at_queue_end--> StopAtQueueEnd
///                        StopAtQueueEnd --final batch processed--> Stopped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerState {
    /// No unit is running, or the running unit must exit at its next poll
    Stopped = 1,
    /// The unit is looping
    Started = 2,
    /// Consumer only: process everything queued, then stop
    StopAtQueueEnd = 3,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            2 => WorkerState::Started,
            3 => WorkerState::StopAtQueueEnd,
            _ => WorkerState::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Started => "started",
            WorkerState::StopAtQueueEnd => "stop_at_queue_end",
        };
        f.write_str(name)
    }
}

/// The single authoritative [`WorkerState`] of one worker.
///
/// Cloning yields another handle to the same flag. Writing it is the only way
/// to signal shutdown into an execution unit.
#[derive(Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    /// A new flag, initially [`WorkerState::Stopped`].
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Stopped as u8)))
    }

    /// Current snapshot.
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally overwrite the state.
    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Shorthand for `get() == Stopped`.
    pub fn is_stopped(&self) -> bool {
        self.get() == WorkerState::Stopped
    }

    /// Move `from` to `to` only if the flag still holds `from`.
    ///
    /// Returns whether the transition happened.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedState").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stopped() {
        assert_eq!(SharedState::new().get(), WorkerState::Stopped);
    }

    #[test]
    fn clones_share_one_flag() {
        let owner = SharedState::new();
        let unit = owner.clone();
        owner.set(WorkerState::Started);
        assert_eq!(unit.get(), WorkerState::Started);
        unit.set(WorkerState::Stopped);
        assert!(owner.is_stopped());
    }

    #[test]
    fn transition_only_from_expected_state() {
        let state = SharedState::new();
        assert!(!state.transition(WorkerState::Started, WorkerState::StopAtQueueEnd));
        assert_eq!(state.get(), WorkerState::Stopped);

        state.set(WorkerState::Started);
        assert!(state.transition(WorkerState::Started, WorkerState::StopAtQueueEnd));
        assert_eq!(state.get(), WorkerState::StopAtQueueEnd);
    }

    #[test]
    fn display_names() {
        assert_eq!(WorkerState::StopAtQueueEnd.to_string(), "stop_at_queue_end");
        assert_eq!(WorkerState::Started.to_string(), "started");
    }
}
