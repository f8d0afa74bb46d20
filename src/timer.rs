//! Timer queue of scheduled resumptions
//!
//! A min-heap ordered by wake time with a monotonic sequence number as the
//! tie-break, so entries scheduled for the same instant pop in insertion
//! order. Comparisons go through [`ticks_diff`], never raw ordering, which
//! keeps the queue correct across the clock wrap as long as all live entries
//! fall within half the wrap period of each other.

use crate::ticks::{ticks_diff, Ticks};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    wake_at: Ticks,
    seq: u64,
    payload: T,
}

// Reverse ordering for a min-heap: earliest wake time first, then lowest
// sequence number.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        ticks_diff(other.wake_at, self.wake_at)
            .cmp(&0)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

/// Priority queue of timed entries, soonest first, FIFO among equal wake
/// times. The queue owns entries until popped.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `payload` to surface at `wake_at`.
    pub fn push(&mut self, wake_at: Ticks, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            wake_at,
            seq,
            payload,
        });
    }

    /// The soonest scheduled wake time, if any.
    pub fn peek_soonest(&self) -> Option<Ticks> {
        self.heap.peek().map(|e| e.wake_at)
    }

    /// Pop the soonest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Ticks) -> Option<(Ticks, T)> {
        match self.heap.peek() {
            Some(e) if ticks_diff(now, e.wake_at) >= 0 => {
                let e = self.heap.pop()?;
                Some((e.wake_at, e.payload))
            }
            _ => None,
        }
    }

    /// Pop the soonest entry regardless of whether it is due.
    pub fn pop_soonest(&mut self) -> Option<(Ticks, T)> {
        self.heap.pop().map(|e| (e.wake_at, e.payload))
    }

    /// Number of scheduled entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no entries are scheduled.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
