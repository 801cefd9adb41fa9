//! Lifecycle plumbing shared by [`Producer`](super::Producer) and
//! [`Consumer`](super::Consumer): one execution unit per worker, per-run
//! result and message channels, and the two owner-side listener tasks.

use super::message::{ChannelSender, ControlMessage, UnitControl};
use super::state::{SharedState, WorkerState};
use crate::error::DaqError;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

/// Callback invoked by the result listener for every result.
pub type ResultCallback<R> = Arc<dyn Fn(R) + Send + Sync>;

/// Callback invoked by the message listener for every control message.
pub type MessageCallback = Arc<dyn Fn(ControlMessage) + Send + Sync>;

type CallbackSlot<T> = Arc<RwLock<Option<Arc<dyn Fn(T) + Send + Sync>>>>;

pub(crate) struct WorkerCore<R> {
    name: Arc<str>,
    state: SharedState,
    unit: Option<JoinHandle<()>>,
    listeners: Vec<JoinHandle<()>>,
    on_result: CallbackSlot<R>,
    on_message: CallbackSlot<ControlMessage>,
}

impl<R: Send + 'static> WorkerCore<R> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: SharedState::new(),
            unit: None,
            listeners: Vec::new(),
            on_result: Arc::new(RwLock::new(None)),
            on_message: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> &SharedState {
        &self.state
    }

    pub(crate) fn set_on_result(&self, callback: ResultCallback<R>) {
        *self.on_result.write() = Some(callback);
    }

    pub(crate) fn set_on_message(&self, callback: MessageCallback) {
        *self.on_message.write() = Some(callback);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.unit.as_ref().is_some_and(|unit| !unit.is_finished())
    }

    /// Request a stop of the current unit, if any, and wait until it has exited.
    pub(crate) async fn stop_and_join(&mut self) {
        if let Some(unit) = self.unit.take() {
            self.state.set(WorkerState::Stopped);
            await_unit(&self.name, unit).await;
        }
    }

    /// Wait for the unit to exit on its own, then for both listeners to drain.
    pub(crate) async fn join(&mut self) {
        if let Some(unit) = self.unit.take() {
            await_unit(&self.name, unit).await;
        }
        for listener in self.listeners.drain(..) {
            if let Err(e) = listener.await {
                error!(worker = %self.name, error = %e, "Listener task failed");
            }
        }
    }

    /// Spawn a fresh unit running `body`. The caller must have stopped and
    /// joined any previous unit first.
    pub(crate) fn launch<F, Fut>(&mut self, kind: &'static str, body: F)
    where
        F: FnOnce(UnitControl, ChannelSender<R>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug_assert!(self.unit.is_none(), "previous unit must be joined");
        self.state.set(WorkerState::Started);

        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        self.listeners.retain(|listener| !listener.is_finished());
        self.listeners
            .push(tokio::spawn(listen(result_rx, Arc::clone(&self.on_result))));
        self.listeners
            .push(tokio::spawn(listen(message_rx, Arc::clone(&self.on_message))));

        let results = ChannelSender::new(
            result_tx,
            self.state.clone(),
            Arc::clone(&self.name),
            "result",
        );
        let messages = ChannelSender::new(
            message_tx,
            self.state.clone(),
            Arc::clone(&self.name),
            "message",
        );
        let ctl = UnitControl::new(Arc::clone(&self.name), self.state.clone(), messages);
        let body = body(ctl.clone(), results);

        let span = tracing::info_span!("unit", worker = %self.name, kind);
        self.unit = Some(tokio::spawn(
            async move {
                info!("Execution unit started");
                // Hooks are guarded individually; this catches panics in the
                // loop's own teardown.
                if let Err(panic) = AssertUnwindSafe(body).catch_unwind().await {
                    report_panic(&ctl, panic.as_ref());
                }
                ctl.send(ControlMessage::Exited);
                info!("Execution unit exited");
            }
            .instrument(span),
        ));
    }
}

impl<R> Drop for WorkerCore<R> {
    fn drop(&mut self) {
        // Orphaned units observe this at their next poll and exit.
        self.state.set(WorkerState::Stopped);
    }
}

async fn await_unit(name: &str, unit: JoinHandle<()>) {
    match unit.await {
        Ok(()) => debug!(worker = %name, "Execution unit joined"),
        Err(e) => error!(worker = %name, error = %e, "Execution unit did not finish cleanly"),
    }
}

async fn listen<T>(mut rx: mpsc::UnboundedReceiver<T>, callback: CallbackSlot<T>) {
    while let Some(value) = rx.recv().await {
        let callback = callback.read().clone();
        if let Some(callback) = callback {
            callback(value);
        }
    }
}

/// Run one hook inside the unit. A panic is reported as
/// [`ControlMessage::Panicked`], stops the unit and yields `None`, so the loop
/// can still take its normal exit path.
pub(crate) async fn guard<F: Future>(ctl: &UnitControl, hook: F) -> Option<F::Output> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(output) => Some(output),
        Err(panic) => {
            report_panic(ctl, panic.as_ref());
            None
        }
    }
}

fn report_panic(ctl: &UnitControl, payload: &(dyn Any + Send)) {
    let reason = panic_reason(payload);
    let err = DaqError::UnitPanicked {
        worker: ctl.worker().to_string(),
        reason: reason.clone(),
    };
    error!(error = %err, "Fault contained");
    ctl.send(ControlMessage::Panicked { reason });
    ctl.set_stopped();
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
