//! Counting semaphores

use crate::ProgrammingError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A counting semaphore: an integer number of permits, never negative.
///
/// `try_acquire` takes a permit if one is available; a task that gets none
/// suspends and re-tries on resume (predicate lane or backoff sleep, the
/// caller's choice). `release` returns a permit and never blocks.
#[derive(Clone)]
pub struct Semaphore {
    permits: Arc<AtomicU32>,
}

impl Semaphore {
    /// Create a semaphore with `permits` initial permits.
    pub fn new(permits: u32) -> Self {
        Self {
            permits: Arc::new(AtomicU32::new(permits)),
        }
    }

    /// Take one permit if any is available.
    pub fn try_acquire(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
            .is_ok()
    }

    /// Return one permit.
    pub fn release(&self) {
        self.permits.fetch_add(1, Ordering::AcqRel);
    }

    /// Permits currently available.
    pub fn available(&self) -> u32 {
        self.permits.load(Ordering::Acquire)
    }
}

/// A semaphore that refuses to grow past its initial permit count.
///
/// Over-release is a programming error, not silently absorbed: it means an
/// acquire/release pairing bug somewhere, and absorbing it would let the
/// protected resource be oversubscribed later.
#[derive(Clone)]
pub struct BoundedSemaphore {
    sem: Semaphore,
    initial: u32,
}

impl BoundedSemaphore {
    /// Create a bounded semaphore with `permits` initial (and maximum)
    /// permits.
    pub fn new(permits: u32) -> Self {
        Self {
            sem: Semaphore::new(permits),
            initial: permits,
        }
    }

    /// Take one permit if any is available.
    pub fn try_acquire(&self) -> bool {
        self.sem.try_acquire()
    }

    /// Return one permit, failing fast if that would exceed the initial
    /// count.
    pub fn release(&self) -> Result<(), ProgrammingError> {
        let grown = self
            .sem
            .permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                if p < self.initial {
                    Some(p + 1)
                } else {
                    None
                }
            });
        grown
            .map(|_| ())
            .map_err(|_| ProgrammingError::SemaphoreOverflow)
    }

    /// Permits currently available.
    pub fn available(&self) -> u32 {
        self.sem.available()
    }
}
