//! Task-level synchronization primitives
//!
//! All primitives here are built purely on the scheduler's suspend/resume
//! contract: execution is single-threaded between suspension points, so a
//! waiting task simply re-checks the primitive's state each time it is
//! resumed, either through the predicate lane ([`crate::Step::until`]) or by
//! sleeping a configured retry interval and trying again. There is no
//! waitlist object inside the primitives beyond what fairness requires.
//!
//! Every primitive is a cheap clone of shared state, so task bodies (which
//! are `'static` closures) can each hold their own copy.
//!
//! The interrupt boundary is narrow: only [`Event::set`], [`Event::set_with`]
//! and [`IsrRing::push`] may be called from interrupt context.

mod barrier;
mod condition;
mod event;
mod lock;
mod queue;
mod ring;
mod semaphore;

pub use barrier::Barrier;
pub use condition::{Condition, WaitFor, WaitProgress};
pub use event::Event;
pub use lock::Lock;
pub use queue::{Queue, QueueError};
pub use ring::IsrRing;
pub use semaphore::{BoundedSemaphore, Semaphore};

use crate::task::Step;

/// Retry policy for primitives waited on with polling-with-backoff.
///
/// Tasks that lose a race for a primitive re-try after sleeping this
/// interval; making it explicit configuration keeps the trade-off between
/// wake latency and idle churn visible at the call site.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Retry interval in milliseconds
    pub interval: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: 1 }
    }
}

impl PollConfig {
    /// Suspend for one retry interval.
    pub fn backoff(&self) -> Step {
        Step::sleep(self.interval)
    }
}
