//! Consumers: workers that own one [`ReadyQueue`] and process what accumulates
//! in it as batches.
//!
//! A batch is taken when the inbox holds at least `buffer_size` items, when
//! `buffer_timeout` has passed since the last batch, or when a graceful
//! stop-at-queue-end was requested. Taking a batch drains the whole inbox
//! atomically, preserving arrival order.

use super::lifecycle::{guard, WorkerCore};
use super::message::{ChannelSender, ControlMessage, UnitControl};
use super::ready_queue::ReadyQueue;
use super::state::WorkerState;
use crate::config::WorkerConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Ordered items drained from an inbox in one iteration.
pub type Batch<T> = Vec<T>;

/// Hooks of a consumer, all run inside the execution unit.
#[async_trait]
pub trait Consume: Send + Sync + 'static {
    /// Inbox item type
    type Item: Send + 'static;
    /// State created by `on_start` and owned by the unit until `on_stop`
    type Context: Send;
    /// Result of processing one batch
    type Output: Send + 'static;
    /// Call-level arguments for `on_start`
    type StartArgs: Send + 'static;
    /// Call-level arguments for every `work` call
    type WorkArgs: Send + Sync + 'static;
    /// Call-level arguments for `on_stop`
    type StopArgs: Send + 'static;

    /// Set up resources. Report unrecoverable problems with
    /// [`UnitControl::fail`] instead of failing outward.
    async fn on_start(&self, ctl: &UnitControl, args: Self::StartArgs) -> Self::Context;

    /// Process one non-empty batch.
    async fn work(
        &self,
        batch: Batch<Self::Item>,
        context: &mut Self::Context,
        ctl: &UnitControl,
        args: &Self::WorkArgs,
    ) -> Self::Output;

    /// Release resources. Runs even when `on_start` failed or `work`
    /// panicked; skipped only when `on_start` itself panicked.
    async fn on_stop(&self, _context: Self::Context, _ctl: &UnitControl, _args: Self::StopArgs) {}
}

/// Owner-side handle of a consumer worker.
pub struct Consumer<C: Consume> {
    task: Arc<C>,
    core: WorkerCore<C::Output>,
    inbox: ReadyQueue<C::Item>,
    buffer_size: usize,
    buffer_timeout: Duration,
    poll_interval: Duration,
}

impl<C: Consume> Consumer<C> {
    /// A stopped consumer with an inactive inbox.
    pub fn new(name: impl Into<String>, task: C) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            task: Arc::new(task),
            core: WorkerCore::new(name),
            inbox: ReadyQueue::new(defaults.inbox_capacity),
            buffer_size: defaults.buffer_size,
            buffer_timeout: defaults.buffer_timeout,
            poll_interval: defaults.poll_interval,
        }
    }

    /// A consumer using the sizing and timing from `config`.
    pub fn from_config(name: impl Into<String>, task: C, config: &WorkerConfig) -> Self {
        let consumer = Self::new(name, task)
            .with_inbox_capacity(config.inbox_capacity)
            .with_buffer_size(config.buffer_size)
            .with_buffer_timeout(config.buffer_timeout)
            .with_poll_interval(config.poll_interval);
        if consumer.buffer_size > consumer.inbox.capacity() {
            warn!(
                worker = %consumer.name(),
                buffer_size = consumer.buffer_size,
                capacity = consumer.inbox.capacity(),
                "buffer_size exceeds inbox capacity; only the timeout will trigger batches"
            );
        }
        consumer
    }

    /// Queue length that triggers a batch (at least 1).
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Longest wait before whatever is queued gets processed.
    pub fn with_buffer_timeout(mut self, buffer_timeout: Duration) -> Self {
        self.buffer_timeout = buffer_timeout;
        self
    }

    /// Replace the inbox with a new one of `capacity`.
    ///
    /// Call before handing the inbox out with [`get_work_queue`](Self::get_work_queue).
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox = ReadyQueue::new(capacity);
        self
    }

    /// Sleep between polls of an idle inbox.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_micros(100));
        self
    }

    /// Worker name used in logs.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// The hook implementation, for instance-level queries.
    pub fn task(&self) -> &C {
        &self.task
    }

    /// Handle to the inbox, for subscribing producers or enqueueing directly.
    pub fn get_work_queue(&self) -> ReadyQueue<C::Item> {
        self.inbox.clone()
    }

    /// Register the callback run by the result listener for each batch result.
    pub fn on_result<F>(&self, callback: F)
    where
        F: Fn(C::Output) + Send + Sync + 'static,
    {
        self.core.set_on_result(Arc::new(callback));
    }

    /// Register the callback run by the message listener.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(ControlMessage) + Send + Sync + 'static,
    {
        self.core.set_on_message(Arc::new(callback));
    }

    /// Stop and join any running unit, purge the inbox, mark it ready and
    /// launch a new unit.
    ///
    /// Items queued before this call are never processed by the new run.
    pub async fn start_new(
        &mut self,
        start_args: C::StartArgs,
        work_args: C::WorkArgs,
        stop_args: C::StopArgs,
    ) {
        self.core.stop_and_join().await;

        let purged = self.inbox.reset_ready();
        if purged > 0 {
            debug!(worker = %self.core.name(), purged, "Purged stale inbox items");
        }

        let task = Arc::clone(&self.task);
        let inbox = self.inbox.clone();
        let buffer_size = self.buffer_size;
        let buffer_timeout = self.buffer_timeout;
        let poll_interval = self.poll_interval;
        info!(
            worker = %self.core.name(),
            buffer_size,
            ?buffer_timeout,
            "Starting consumer"
        );
        self.core.launch("consumer", move |ctl, results| {
            consume_loop(ConsumerRun {
                task,
                ctl,
                results,
                inbox,
                buffer_size,
                buffer_timeout,
                poll_interval,
                start_args,
                work_args,
                stop_args,
            })
        });
    }

    /// Ask the unit to exit at its next poll. A partially filled batch that has
    /// not triggered yet is abandoned. Idempotent.
    pub fn set_stopped(&self) {
        self.core.state().set(WorkerState::Stopped);
    }

    /// Process everything queued as one final batch, then stop.
    ///
    /// Only a started consumer can switch; returns whether it did.
    pub fn set_stop_at_queue_end(&self) -> bool {
        self.core
            .state()
            .transition(WorkerState::Started, WorkerState::StopAtQueueEnd)
    }

    /// Current state snapshot.
    pub fn get_state(&self) -> WorkerState {
        self.core.state().get()
    }

    /// Whether an execution unit is currently running.
    pub fn is_alive(&self) -> bool {
        self.core.is_alive()
    }

    /// Wait until the unit has exited and all results were delivered.
    pub async fn join(&mut self) {
        self.core.join().await;
    }
}

struct ConsumerRun<C: Consume> {
    task: Arc<C>,
    ctl: UnitControl,
    results: ChannelSender<C::Output>,
    inbox: ReadyQueue<C::Item>,
    buffer_size: usize,
    buffer_timeout: Duration,
    poll_interval: Duration,
    start_args: C::StartArgs,
    work_args: C::WorkArgs,
    stop_args: C::StopArgs,
}

async fn consume_loop<C: Consume>(run: ConsumerRun<C>) {
    let ConsumerRun {
        task,
        ctl,
        results,
        inbox,
        buffer_size,
        buffer_timeout,
        poll_interval,
        start_args,
        work_args,
        stop_args,
    } = run;

    let Some(mut context) = guard(&ctl, task.on_start(&ctl, start_args)).await else {
        inbox.set_not_ready();
        return;
    };
    let mut last_worked = Instant::now();

    loop {
        let state = ctl.state();
        if state == WorkerState::Stopped {
            break;
        }
        let final_batch = state == WorkerState::StopAtQueueEnd;

        let triggered = final_batch
            || inbox.len() >= buffer_size
            || last_worked.elapsed() >= buffer_timeout;
        if !triggered {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        let batch = inbox.drain();
        last_worked = Instant::now();
        if !batch.is_empty() {
            debug!(batch_len = batch.len(), final_batch, "Processing batch");
            let Some(output) = guard(&ctl, task.work(batch, &mut context, &ctl, &work_args)).await
            else {
                break;
            };
            if results.send(output).is_err() {
                ctl.set_stopped();
                break;
            }
        } else if !final_batch {
            // Timeout fired on an empty inbox
            tokio::time::sleep(poll_interval).await;
        }

        if final_batch {
            ctl.shared_state().set(WorkerState::Stopped);
            info!("Queue drained, consumer stopped");
            break;
        }
    }

    inbox.set_not_ready();
    debug!("Consumer loop finished, running on_stop");
    guard(&ctl, task.on_stop(context, &ctl, stop_args)).await;
}
