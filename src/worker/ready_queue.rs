//! Toggle-able inbox for consumers.
//!
//! A [`ReadyQueue`] is a bounded FIFO plus a ready flag. Producers offer items
//! without blocking; an offer is only accepted while the queue is ready and has
//! room. Marking the queue not-ready discards its contents under the same lock,
//! so no stale item can be taken afterwards.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of [`ReadyQueue::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The item was enqueued
    Accepted,
    /// The queue is inactive; the item was dropped
    NotReady,
    /// The queue is at capacity; the item was dropped
    Full,
}

impl Offer {
    /// Whether the item made it into the queue.
    pub fn is_accepted(self) -> bool {
        self == Offer::Accepted
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    ready: bool,
}

/// Shared handle to one inbox. Clones refer to the same queue.
pub struct ReadyQueue<T> {
    inner: Arc<Mutex<Inner<T>>>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl<T> Clone for ReadyQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dropped: Arc::clone(&self.dropped),
            capacity: self.capacity,
        }
    }
}

impl<T> ReadyQueue<T> {
    /// Create an inactive queue holding at most `capacity` items.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                ready: false,
            })),
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether offers are currently accepted.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Activate the queue. Existing contents are kept.
    pub fn set_ready(&self) {
        self.inner.lock().ready = true;
    }

    /// Deactivate the queue and discard everything in it.
    pub fn set_not_ready(&self) {
        let mut inner = self.inner.lock();
        inner.ready = false;
        inner.items.clear();
    }

    /// Discard the contents and activate the queue in one step.
    ///
    /// Returns the number of discarded items.
    pub fn reset_ready(&self) -> usize {
        let mut inner = self.inner.lock();
        let purged = inner.items.len();
        inner.items.clear();
        inner.ready = true;
        purged
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Enqueue `item` if the queue is ready and not full. Never blocks.
    pub fn offer(&self, item: T) -> Offer {
        let outcome = {
            let mut inner = self.inner.lock();
            if !inner.ready {
                Offer::NotReady
            } else if inner.items.len() >= self.capacity {
                Offer::Full
            } else {
                inner.items.push_back(item);
                Offer::Accepted
            }
        };
        if !outcome.is_accepted() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().items.drain(..).collect()
    }

    /// Total number of offers rejected since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for ReadyQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReadyQueue")
            .field("ready", &inner.ready)
            .field("len", &inner.items.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_is_inactive_and_rejects() {
        let queue = ReadyQueue::new(4);
        assert!(!queue.is_ready());
        assert_eq!(queue.offer(1), Offer::NotReady);
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn ready_queue_preserves_fifo_order() {
        let queue = ReadyQueue::new(8);
        queue.set_ready();
        for i in 1..=5 {
            assert!(queue.offer(i).is_accepted());
        }
        assert_eq!(queue.drain(), vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn set_not_ready_empties_immediately() {
        let queue = ReadyQueue::new(8);
        queue.set_ready();
        queue.offer("a");
        queue.offer("b");
        assert_eq!(queue.len(), 2);

        queue.set_not_ready();
        assert_eq!(queue.len(), 0);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn full_queue_drops_new_items() {
        let queue = ReadyQueue::new(2);
        queue.set_ready();
        assert_eq!(queue.offer(1), Offer::Accepted);
        assert_eq!(queue.offer(2), Offer::Accepted);
        assert!(queue.is_full());
        assert_eq!(queue.offer(3), Offer::Full);
        assert_eq!(queue.drain(), vec![1, 2]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn reset_ready_discards_stale_items() {
        let queue = ReadyQueue::new(4);
        queue.set_ready();
        queue.offer(10);
        queue.offer(11);
        assert_eq!(queue.reset_ready(), 2);
        assert!(queue.is_ready());
        assert!(queue.is_empty());
    }

    #[test]
    fn clones_share_contents() {
        let inbox = ReadyQueue::new(4);
        let producer_side = inbox.clone();
        inbox.set_ready();
        producer_side.offer(7);
        assert_eq!(inbox.drain(), vec![7]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = ReadyQueue::<u8>::new(0);
        assert_eq!(queue.capacity(), 1);
    }
}
