//! Producers: workers that generate one value per iteration and fan it out.
//!
//! Fan-out never blocks. Each subscriber inbox either accepts the value or,
//! when it is inactive or full, silently misses it, so a slow or stopped
//! consumer can never stall production. The producer's own result channel
//! sees every value regardless of subscribers.

use super::lifecycle::{guard, WorkerCore};
use super::message::{ChannelSender, ControlMessage, UnitControl};
use super::ready_queue::{Offer, ReadyQueue};
use super::state::WorkerState;
use crate::config::WorkerConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Hooks of a producer, all run inside the execution unit.
///
/// Instance-level arguments live in the implementing type and are reached
/// through `&self`; call-level arguments arrive through the three associated
/// argument types given to [`Producer::start_new`].
#[async_trait]
pub trait Produce: Send + Sync + 'static {
    /// State created by `on_start` and owned by the unit until `on_stop`
    type Context: Send;
    /// One produced value
    type Output: Clone + Send + 'static;
    /// Call-level arguments for `on_start`
    type StartArgs: Send + 'static;
    /// Call-level arguments for every `work` call
    type WorkArgs: Send + Sync + 'static;
    /// Call-level arguments for `on_stop`
    type StopArgs: Send + 'static;

    /// Set up resources. Must not fail outward: on an unrecoverable problem,
    /// report it with [`UnitControl::fail`] and return a context that
    /// `on_stop` can tear down.
    async fn on_start(&self, ctl: &UnitControl, args: Self::StartArgs) -> Self::Context;

    /// Produce at most one value. `None` means nothing was produced this tick.
    async fn work(
        &self,
        context: &mut Self::Context,
        ctl: &UnitControl,
        args: &Self::WorkArgs,
    ) -> Option<Self::Output>;

    /// Release resources. Runs even when `on_start` failed or `work`
    /// panicked; skipped only when `on_start` itself panicked.
    async fn on_stop(&self, _context: Self::Context, _ctl: &UnitControl, _args: Self::StopArgs) {}
}

/// Owner-side handle of a producer worker.
pub struct Producer<P: Produce> {
    task: Arc<P>,
    core: WorkerCore<P::Output>,
    subscribers: Vec<ReadyQueue<P::Output>>,
    work_timeout: Duration,
    poll_interval: Duration,
}

impl<P: Produce> Producer<P> {
    /// A stopped, unthrottled producer without subscribers.
    pub fn new(name: impl Into<String>, task: P) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            task: Arc::new(task),
            core: WorkerCore::new(name),
            subscribers: Vec::new(),
            work_timeout: defaults.work_timeout,
            poll_interval: defaults.poll_interval,
        }
    }

    /// A producer using the timing from `config`.
    pub fn from_config(name: impl Into<String>, task: P, config: &WorkerConfig) -> Self {
        Self::new(name, task)
            .with_work_timeout(config.work_timeout)
            .with_poll_interval(config.poll_interval)
    }

    /// Minimum spacing between iterations. Zero runs `work` back to back.
    pub fn with_work_timeout(mut self, work_timeout: Duration) -> Self {
        self.work_timeout = work_timeout;
        self
    }

    /// Sleep used while waiting for the next iteration to become due.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_micros(100));
        self
    }

    /// Worker name used in logs.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// The hook implementation, for instance-level queries.
    pub fn task(&self) -> &P {
        &self.task
    }

    /// Replace the subscriber inboxes. Takes effect at the next `start_new`.
    pub fn set_subscribers(&mut self, subscribers: Vec<ReadyQueue<P::Output>>) {
        self.subscribers = subscribers;
    }

    /// Subscriber inboxes that the next run will fan out to.
    pub fn subscribers(&self) -> &[ReadyQueue<P::Output>] {
        &self.subscribers
    }

    /// Register the callback run by the result listener for each value.
    pub fn on_result<F>(&self, callback: F)
    where
        F: Fn(P::Output) + Send + Sync + 'static,
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

    /// Stop and join any running unit, then launch a new one.
    ///
    /// Returns as soon as the new unit is spawned, not once it has produced.
    pub async fn start_new(
        &mut self,
        start_args: P::StartArgs,
        work_args: P::WorkArgs,
        stop_args: P::StopArgs,
    ) {
        self.core.stop_and_join().await;

        let task = Arc::clone(&self.task);
        let subscribers = self.subscribers.clone();
        let work_timeout = self.work_timeout;
        let poll_interval = self.poll_interval;
        info!(
            worker = %self.core.name(),
            subscribers = subscribers.len(),
            ?work_timeout,
            "Starting producer"
        );
        self.core.launch("producer", move |ctl, results| {
            produce_loop(ProducerRun {
                task,
                ctl,
                results,
                subscribers,
                work_timeout,
                poll_interval,
                start_args,
                work_args,
                stop_args,
            })
        });
    }

    /// Ask the unit to exit at its next iteration boundary. Idempotent.
    pub fn set_stopped(&self) {
        self.core.state().set(WorkerState::Stopped);
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
    ///
    /// The unit only exits once stopped, so call [`set_stopped`](Self::set_stopped)
    /// first unless a hook stops it.
    pub async fn join(&mut self) {
        self.core.join().await;
    }
}

struct ProducerRun<P: Produce> {
    task: Arc<P>,
    ctl: UnitControl,
    results: ChannelSender<P::Output>,
    subscribers: Vec<ReadyQueue<P::Output>>,
    work_timeout: Duration,
    poll_interval: Duration,
    start_args: P::StartArgs,
    work_args: P::WorkArgs,
    stop_args: P::StopArgs,
}

async fn produce_loop<P: Produce>(run: ProducerRun<P>) {
    let ProducerRun {
        task,
        ctl,
        results,
        subscribers,
        work_timeout,
        poll_interval,
        start_args,
        work_args,
        stop_args,
    } = run;

    let Some(mut context) = guard(&ctl, task.on_start(&ctl, start_args)).await else {
        return;
    };
    let mut last_worked: Option<Instant> = None;

    while !ctl.is_stopped() {
        if let Some(last) = last_worked {
            let elapsed = last.elapsed();
            if elapsed < work_timeout {
                tokio::time::sleep((work_timeout - elapsed).min(poll_interval)).await;
                continue;
            }
        }
        last_worked = Some(Instant::now());

        let Some(produced) = guard(&ctl, task.work(&mut context, &ctl, &work_args)).await else {
            break;
        };
        let Some(value) = produced else {
            tokio::task::yield_now().await;
            continue;
        };

        for (index, inbox) in subscribers.iter().enumerate() {
            match inbox.offer(value.clone()) {
                Offer::Accepted => {}
                Offer::NotReady => trace!(subscriber = index, "Subscriber not ready, dropped"),
                Offer::Full => trace!(subscriber = index, "Subscriber full, dropped"),
            }
        }

        if results.send(value).is_err() {
            ctl.set_stopped();
            break;
        }
        if work_timeout.is_zero() {
            tokio::task::yield_now().await;
        }
    }

    debug!("Producer loop finished, running on_stop");
    guard(&ctl, task.on_stop(context, &ctl, stop_args)).await;
}
