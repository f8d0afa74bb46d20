//! Level-triggered event flag with an optional payload

use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Inner {
    set: AtomicBool,
    payload: AtomicCell<u64>,
    has_payload: AtomicBool,
}

/// A level-triggered boolean plus an optional fixed-size payload.
///
/// `set` and `set_with` are safe from interrupt context: they are
/// allocation-free and write the payload before the flag, so a consumer
/// that observes the flag always reads a complete payload. Clearing is the
/// consumer's responsibility; there is no auto-reset, so multiple waiters
/// can all observe one `set()`.
///
/// A waiter suspends on the flag through the predicate lane:
///
/// ```ignore
/// let ev = event.clone();
/// Step::until(move || ev.is_set())
/// ```
#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<Inner>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            set: AtomicBool::new(false),
            payload: AtomicCell::new(0),
            has_payload: AtomicBool::new(false),
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Event {}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("set", &self.inner.set.load(Ordering::Relaxed))
            .finish()
    }
}

impl Event {
    /// Create an unset event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Safe from interrupt context.
    pub fn set(&self) {
        self.inner.set.store(true, Ordering::Release);
    }

    /// Set the flag with a payload. Safe from interrupt context.
    pub fn set_with(&self, payload: u64) {
        self.inner.payload.store(payload);
        self.inner.has_payload.store(true, Ordering::Release);
        self.inner.set.store(true, Ordering::Release);
    }

    /// Whether the flag is set.
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::Acquire)
    }

    /// Clear the flag and drop any payload.
    pub fn clear(&self) {
        self.inner.set.store(false, Ordering::Release);
        self.inner.has_payload.store(false, Ordering::Release);
    }

    /// Take the payload, if one was delivered with the flag.
    pub fn take_payload(&self) -> Option<u64> {
        if self.inner.has_payload.swap(false, Ordering::AcqRel) {
            Some(self.inner.payload.load())
        } else {
            None
        }
    }
}
