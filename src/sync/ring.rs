//! Interrupt-to-task ring buffer

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Inner<T> {
    queue: ArrayQueue<T>,
    overruns: AtomicU32,
}

/// A pre-allocated, fixed-capacity ring for pushing records from interrupt
/// context to task context.
///
/// `push` is allocation-free and lock-free; when the ring is full the
/// record is dropped and the overrun counter incremented, since an
/// interrupt handler can neither block nor grow the buffer. Consumers
/// drain with `pop` from task context and can watch `overruns` to detect
/// lost records.
pub struct IsrRing<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for IsrRing<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> IsrRing<T> {
    /// Create a ring holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: ArrayQueue::new(capacity),
                overruns: AtomicU32::new(0),
            }),
        }
    }

    /// Push one record. Safe from interrupt context. Returns false (and
    /// counts an overrun) if the ring was full.
    pub fn push(&self, record: T) -> bool {
        match self.inner.queue.push(record) {
            Ok(()) => true,
            Err(_) => {
                self.inner.overruns.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop the oldest record, from task context.
    pub fn pop(&self) -> Option<T> {
        self.inner.queue.pop()
    }

    /// Records currently buffered.
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether the ring has no records.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    /// Records dropped because the ring was full.
    pub fn overruns(&self) -> u32 {
        self.inner.overruns.load(Ordering::Relaxed)
    }
}
