//! Test workers shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use daq_workers::worker::{Batch, Consume, Consumer, ControlMessage, Produce, Producer, UnitControl};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Produces 1, 2, 3, ... and stops itself after `limit` values.
pub struct Counter {
    pub limit: Option<u32>,
}

#[async_trait]
impl Produce for Counter {
    type Context = u32;
    type Output = u32;
    type StartArgs = ();
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, _ctl: &UnitControl, _args: ()) -> u32 {
        0
    }

    async fn work(&self, next: &mut u32, ctl: &UnitControl, _args: &()) -> Option<u32> {
        if self.limit.is_some_and(|limit| *next >= limit) {
            ctl.set_stopped();
            return None;
        }
        *next += 1;
        Some(*next)
    }
}

/// Returns each batch unchanged and counts how many units are running.
#[derive(Default)]
pub struct Collect {
    pub alive: Arc<AtomicUsize>,
    pub max_alive: Arc<AtomicUsize>,
    pub work_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Consume for Collect {
    type Item = u32;
    type Context = ();
    type Output = Vec<u32>;
    type StartArgs = ();
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, _ctl: &UnitControl, _args: ()) {
        let now = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_alive.fetch_max(now, Ordering::SeqCst);
    }

    async fn work(
        &self,
        batch: Batch<u32>,
        _context: &mut (),
        _ctl: &UnitControl,
        _args: &(),
    ) -> Vec<u32> {
        self.work_calls.fetch_add(1, Ordering::SeqCst);
        batch
    }

    async fn on_stop(&self, _context: (), _ctl: &UnitControl, _args: ()) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Route every result of `consumer` into a channel.
pub fn batches(consumer: &Consumer<Collect>) -> mpsc::UnboundedReceiver<Vec<u32>> {
    let (tx, rx) = mpsc::unbounded_channel();
    consumer.on_result(move |batch| {
        let _ = tx.send(batch);
    });
    rx
}

/// Route every control message of `producer` into a channel.
pub fn messages<P: Produce>(producer: &Producer<P>) -> mpsc::UnboundedReceiver<ControlMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    producer.on_message(move |message| {
        let _ = tx.send(message);
    });
    rx
}

/// Route every control message of `consumer` into a channel.
pub fn consumer_messages<C: Consume>(
    consumer: &Consumer<C>,
) -> mpsc::UnboundedReceiver<ControlMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    consumer.on_message(move |message| {
        let _ = tx.send(message);
    });
    rx
}

/// Next value from `rx`, failing the test after `secs` seconds.
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>, secs: u64) -> T {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for value")
        .expect("channel closed")
}
