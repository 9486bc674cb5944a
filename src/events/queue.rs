//! Bounded lock-free MPSC queue for one event kind.
//!
//! Producers are driver threads on the hot path: pushing must never block
//! and never allocate, so the ring is preallocated (`ArrayQueue`) and a full
//! queue displaces the oldest entry instead of stalling the producer. The
//! single consumer is the logger thread. Drops and the high-water mark are
//! tracked for the shutdown diagnostics; they are never reported from the
//! producer side.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct EventQueue<T> {
    queue: ArrayQueue<T>,
    dropped: AtomicU64,
    high_water: AtomicUsize,
}

impl<T> EventQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Non-blocking push; on a full ring the oldest event is dropped.
    #[inline]
    pub fn push(&self, event: T) {
        if self.queue.force_push(event).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.high_water.fetch_max(self.queue.len(), Ordering::Relaxed);
    }

    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Events displaced by `push` since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Largest observed occupancy.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}
