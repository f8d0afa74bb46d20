//! Cooperative mutual exclusion

use crate::task::TaskId;
use crate::ProgrammingError;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct Inner {
    owner: AtomicCell<Option<TaskId>>,
    queue: Mutex<VecDeque<TaskId>>,
}

/// A binary lock with FIFO handoff.
///
/// `try_acquire` either takes the lock or enqueues the caller; on release
/// the lock is handed directly to the queue head, so waiters acquire in
/// arrival order and a late arrival can never barge past them. A waiting
/// task polls `try_acquire` each time it is resumed:
///
/// ```ignore
/// let lock = lock.clone();
/// Step::until(move || lock.try_acquire(me))
/// ```
///
/// The lock is not reentrant; acquiring while already holding it succeeds
/// trivially (the handoff check) rather than deadlocking, but release is
/// still single.
#[derive(Clone, Default)]
pub struct Lock {
    inner: Arc<Inner>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            owner: AtomicCell::new(None),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl Lock {
    /// Create an unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to take the lock for `me`.
    ///
    /// Returns true if the lock is now held by `me` (freshly taken, or
    /// handed off by the previous holder). On false the caller has been
    /// enqueued and should suspend and re-try on resume.
    pub fn try_acquire(&self, me: TaskId) -> bool {
        if self.inner.owner.load() == Some(me) {
            // Freshly handed off to us, or already held
            self.dequeue(me);
            return true;
        }
        let mut queue = self.inner.queue.lock();
        let first_in_line = queue.front().is_none_or(|&head| head == me);
        if first_in_line
            && self
                .inner
                .owner
                .compare_exchange(None, Some(me))
                .is_ok()
        {
            if queue.front() == Some(&me) {
                queue.pop_front();
            }
            return true;
        }
        if !queue.contains(&me) {
            queue.push_back(me);
        }
        false
    }

    /// Release the lock, handing it to the queue head if one is waiting.
    ///
    /// Fails fast if `me` does not hold the lock.
    pub fn release(&self, me: TaskId) -> Result<(), ProgrammingError> {
        if self.inner.owner.load() != Some(me) {
            return Err(ProgrammingError::LockNotHeld);
        }
        let next = self.inner.queue.lock().front().copied();
        self.inner.owner.store(next);
        Ok(())
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<TaskId> {
        self.inner.owner.load()
    }

    /// Whether the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.inner.owner.load().is_some()
    }

    /// Number of tasks queued for the lock.
    pub fn waiting(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Withdraw `me` from the lock entirely: drop any queue entry and pass
    /// on a handoff that arrived after the caller stopped waiting. Used in
    /// cancellation cleanup so a dead waiter cannot strand the lock.
    pub fn abandon(&self, me: TaskId) {
        let mut queue = self.inner.queue.lock();
        queue.retain(|&t| t != me);
        if self.inner.owner.load() == Some(me) {
            let next = queue.front().copied();
            self.inner.owner.store(next);
        }
    }

    fn dequeue(&self, me: TaskId) {
        let mut queue = self.inner.queue.lock();
        if queue.front() == Some(&me) {
            queue.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let lock = Lock::new();
        let a = TaskId::new();
        assert!(lock.try_acquire(a));
        assert_eq!(lock.holder(), Some(a));
        lock.release(a).unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_contended_handoff_is_fifo() {
        let lock = Lock::new();
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        assert!(lock.try_acquire(a));
        assert!(!lock.try_acquire(b));
        assert!(!lock.try_acquire(c));
        assert_eq!(lock.waiting(), 2);

        lock.release(a).unwrap();
        // Handed to b; c still cannot take it
        assert!(!lock.try_acquire(c));
        assert!(lock.try_acquire(b));
        assert_eq!(lock.holder(), Some(b));

        lock.release(b).unwrap();
        assert!(lock.try_acquire(c));
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let lock = Lock::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        assert_eq!(lock.release(a), Err(ProgrammingError::LockNotHeld));
        assert!(lock.try_acquire(a));
        assert_eq!(lock.release(b), Err(ProgrammingError::LockNotHeld));
        lock.release(a).unwrap();
    }

    #[test]
    fn test_abandon_passes_on_a_stale_handoff() {
        let lock = Lock::new();
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        assert!(lock.try_acquire(a));
        assert!(!lock.try_acquire(b));
        assert!(!lock.try_acquire(c));

        // The lock is handed to b, but b is cancelled before it re-tries.
        lock.release(a).unwrap();
        lock.abandon(b);
        assert!(lock.try_acquire(c));
        assert_eq!(lock.holder(), Some(c));
    }

    #[test]
    fn test_reacquire_while_held_is_trivial() {
        let lock = Lock::new();
        let a = TaskId::new();
        assert!(lock.try_acquire(a));
        assert!(lock.try_acquire(a));
        lock.release(a).unwrap();
        assert!(!lock.is_held());
    }
}
