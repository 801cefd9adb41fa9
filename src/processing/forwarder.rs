//! Pass-through consumer.

use crate::worker::{Batch, Consume, UnitControl};
use async_trait::async_trait;
use std::marker::PhantomData;

/// Consumer that hands every batch to its result callback unchanged.
///
/// Useful for buffering a fast producer in front of a slow display.
pub struct Forwarder<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> Forwarder<T> {
    /// New forwarder.
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for Forwarder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Consume for Forwarder<T> {
    type Item = T;
    type Context = ();
    type Output = Batch<T>;
    type StartArgs = ();
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, _ctl: &UnitControl, _args: ()) {}

    async fn work(
        &self,
        batch: Batch<T>,
        _context: &mut (),
        _ctl: &UnitControl,
        _args: &(),
    ) -> Batch<T> {
        batch
    }
}
