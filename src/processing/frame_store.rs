//! Shared "latest frame" and baseline, owned by a single actor task.
//!
//! Several consumers need the most recent parsed frame and the reference
//! baseline (the parser writes them, the CLI and recorder read them). Instead of
//! sharing a lock, one task owns both and everyone talks to it through a
//! cloneable [`FrameStore`] handle.
//!
//! ```text
//! Handle                              Actor Task
//! ------                              ----------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                     3. Receive command
//!                                     4. Read or replace state
//!                                     5. Send response
//! 6. Await oneshot receiver   <------
//! ```

use super::frame_parser::ParsedFrame;
use crate::error::{AppResult, DaqError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const COMMAND_CAPACITY: usize = 32;

/// Commands understood by the frame store actor.
///
/// Every variant carries a `oneshot::Sender` for its response. Use the helper
/// constructors, which also return the matching receiver.
#[derive(Debug)]
pub enum FrameCommand {
    /// Latest parsed frame, if any
    GetCurrent {
        /// Response channel
        response: oneshot::Sender<Option<ParsedFrame>>,
    },
    /// Replace the latest parsed frame
    SetCurrent {
        /// New frame
        frame: ParsedFrame,
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },
    /// Current baseline values, if any
    GetBaseline {
        /// Response channel
        response: oneshot::Sender<Option<Vec<f64>>>,
    },
    /// Replace or clear the baseline
    SetBaseline {
        /// New baseline, `None` clears it
        values: Option<Vec<f64>>,
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },
    /// Copy the latest frame's values into the baseline
    ///
    /// Responds with the captured values, or `None` when no frame arrived yet.
    CaptureBaseline {
        /// Response channel
        response: oneshot::Sender<Option<Vec<f64>>>,
    },
}

impl FrameCommand {
    /// Creates a `GetCurrent` command.
    pub fn get_current() -> (Self, oneshot::Receiver<Option<ParsedFrame>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetCurrent { response: tx }, rx)
    }

    /// Creates a `SetCurrent` command.
    pub fn set_current(frame: ParsedFrame) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetCurrent { frame, response: tx }, rx)
    }

    /// Creates a `GetBaseline` command.
    pub fn get_baseline() -> (Self, oneshot::Receiver<Option<Vec<f64>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetBaseline { response: tx }, rx)
    }

    /// Creates a `SetBaseline` command.
    pub fn set_baseline(values: Option<Vec<f64>>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetBaseline { values, response: tx }, rx)
    }

    /// Creates a `CaptureBaseline` command.
    pub fn capture_baseline() -> (Self, oneshot::Receiver<Option<Vec<f64>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::CaptureBaseline { response: tx }, rx)
    }
}

#[derive(Default)]
struct FrameStoreActor {
    current: Option<ParsedFrame>,
    baseline: Option<Vec<f64>>,
}

impl FrameStoreActor {
    async fn run(mut self, mut rx: mpsc::Receiver<FrameCommand>) {
        while let Some(command) = rx.recv().await {
            // A dropped receiver only means the caller lost interest.
            match command {
                FrameCommand::GetCurrent { response } => {
                    let _ = response.send(self.current.clone());
                }
                FrameCommand::SetCurrent { frame, response } => {
                    self.current = Some(frame);
                    let _ = response.send(());
                }
                FrameCommand::GetBaseline { response } => {
                    let _ = response.send(self.baseline.clone());
                }
                FrameCommand::SetBaseline { values, response } => {
                    debug!(len = values.as_ref().map(Vec::len), "Baseline replaced");
                    self.baseline = values;
                    let _ = response.send(());
                }
                FrameCommand::CaptureBaseline { response } => {
                    let captured = self.current.as_ref().map(|frame| frame.values.clone());
                    if captured.is_some() {
                        self.baseline = captured.clone();
                    }
                    let _ = response.send(captured);
                }
            }
        }
        info!("Frame store stopped");
    }
}

/// Cloneable handle to the frame store actor.
///
/// The actor exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct FrameStore {
    tx: mpsc::Sender<FrameCommand>,
}

impl FrameStore {
    /// Spawn the actor on the current runtime and return a handle to it.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = tokio::spawn(FrameStoreActor::default().run(rx));
        (Self { tx }, handle)
    }

    async fn request<T>(&self, command: FrameCommand, rx: oneshot::Receiver<T>) -> AppResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DaqError::FrameStoreClosed)?;
        rx.await.map_err(|_| DaqError::FrameStoreClosed)
    }

    /// Latest parsed frame.
    pub async fn current(&self) -> AppResult<Option<ParsedFrame>> {
        let (cmd, rx) = FrameCommand::get_current();
        self.request(cmd, rx).await
    }

    /// Replace the latest parsed frame.
    pub async fn set_current(&self, frame: ParsedFrame) -> AppResult<()> {
        let (cmd, rx) = FrameCommand::set_current(frame);
        self.request(cmd, rx).await
    }

    /// Current baseline.
    pub async fn baseline(&self) -> AppResult<Option<Vec<f64>>> {
        let (cmd, rx) = FrameCommand::get_baseline();
        self.request(cmd, rx).await
    }

    /// Replace the baseline, or clear it with `None`.
    pub async fn set_baseline(&self, values: Option<Vec<f64>>) -> AppResult<()> {
        let (cmd, rx) = FrameCommand::set_baseline(values);
        self.request(cmd, rx).await
    }

    /// Use the latest frame as the new baseline.
    pub async fn capture_baseline(&self) -> AppResult<Option<Vec<f64>>> {
        let (cmd, rx) = FrameCommand::capture_baseline();
        self.request(cmd, rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn parsed(values: Vec<f64>) -> ParsedFrame {
        ParsedFrame {
            tag: "EIT".into(),
            label: "EIT".into(),
            values,
            timestamp: Utc::now(),
            delta: None,
        }
    }

    #[tokio::test]
    async fn stores_current_and_captures_baseline() {
        let (store, _handle) = FrameStore::spawn();
        assert_eq!(store.current().await.unwrap(), None);
        assert_eq!(store.capture_baseline().await.unwrap(), None);

        store.set_current(parsed(vec![1.0, 2.0])).await.unwrap();
        assert_eq!(
            store.capture_baseline().await.unwrap(),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(store.baseline().await.unwrap(), Some(vec![1.0, 2.0]));

        store.set_baseline(None).await.unwrap();
        assert_eq!(store.baseline().await.unwrap(), None);
    }

    #[tokio::test]
    async fn closed_store_reports_error() {
        let (store, handle) = FrameStore::spawn();
        handle.abort();
        let _ = handle.await;
        assert!(matches!(
            store.current().await,
            Err(DaqError::FrameStoreClosed)
        ));
    }
}
