//! Bounded FIFO queue

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Why a non-blocking queue operation could not proceed.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError<T> {
    /// The queue is at capacity; the rejected item is handed back
    #[error("queue is full")]
    Full(T),

    /// The queue has no items
    #[error("queue is empty")]
    Empty,
}

/// A bounded FIFO queue between tasks.
///
/// `try_put` and `try_get` never suspend; a producer or consumer that gets
/// [`QueueError::Full`] or [`QueueError::Empty`] suspends itself and
/// re-tries on resume, in the polling style the other primitives use:
///
/// ```ignore
/// match q.try_get() {
///     Ok(item) => consume(item),
///     Err(_) => return poll.backoff(),
/// }
/// ```
#[derive(Clone)]
pub struct Queue<T> {
    items: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
}

impl<T> Queue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Enqueue `item`, or hand it back if the queue is full.
    pub fn try_put(&self, item: T) -> Result<(), QueueError<T>> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(QueueError::Full(item));
        }
        items.push_back(item);
        Ok(())
    }

    /// Dequeue the oldest item.
    pub fn try_get(&self) -> Result<T, QueueError<T>> {
        self.items.lock().pop_front().ok_or(QueueError::Empty)
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue has no items.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
