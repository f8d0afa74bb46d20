//! Cooperative task runtime for single-core, memory-constrained controllers.
//!
//! This crate provides:
//! - A single-threaded scheduler multiplexing many logical tasks
//! - A readiness-based I/O reactor (one-shot registrations over `poll(2)`)
//! - A timer queue with wrap-safe clock arithmetic
//! - Cooperative cancellation with named tasks, groups, and rendezvous
//!   confirmation
//! - Task-level synchronization primitives (Lock, Event, Semaphore, Barrier,
//!   Condition, Queue) built purely on the scheduler's suspend/resume contract
//!
//! Concurrency is entirely cooperative: a running task never loses control
//! except at a suspension point it names by yielding a [`SuspendReason`].
//! Hardware interrupt handlers interact only through the narrow reentrant
//! surface (`Event::set`, `IsrRing::push`).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arena;
pub mod reactor;
pub mod registry;
pub mod scheduler;
#[cfg(unix)]
pub mod stream;
pub mod sync;
pub mod task;
pub mod ticks;
pub mod timer;

pub use arena::TaskRef;
pub use reactor::Readiness;
pub use registry::Rendezvous;
pub use scheduler::{Priority, Remote, Scheduler, SchedulerConfig, SpawnOptions};
pub use sync::{
    Barrier, BoundedSemaphore, Condition, Event, IsrRing, Lock, PollConfig, Queue, QueueError,
    Semaphore, WaitFor, WaitProgress,
};
pub use task::{
    CancelKind, Fd, Step, SuspendReason, Task, TaskHandle, TaskId, TaskState, Wake,
};
pub use ticks::{ticks_add, ticks_diff, Clock, ManualClock, SystemClock, Ticks, TICKS_PERIOD};

/// Violations of a primitive's usage contract. These fail fast and loudly,
/// never silently clamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgrammingError {
    /// A Lock was released by a task that does not hold it
    #[error("lock released by a task that does not hold it")]
    LockNotHeld,

    /// A BoundedSemaphore release would exceed the initial permit count
    #[error("bounded semaphore released past its initial permit count")]
    SemaphoreOverflow,

    /// A Barrier arrival would exceed the participant count
    #[error("barrier arrival count exceeds participant count")]
    BarrierOverflow,

    /// A Condition operation requires its Lock to be held by the caller
    #[error("condition used without holding its lock")]
    ConditionLockNotHeld,

    /// A named task was spawned while the name is still live
    #[error("task name {0:?} is already registered")]
    DuplicateName(String),

    /// An I/O resource already has a waiter for this interest
    #[error("fd {0} already has a waiter registered for this interest")]
    FdBusy(Fd),

    /// A task completed with a result of an unexpected type
    #[error("task completed with an unexpected result type")]
    ResultType,
}

/// Runtime failures surfaced to tasks and to the run loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// A usage-contract violation
    #[error(transparent)]
    Programming(#[from] ProgrammingError),

    /// The task was cooperatively cancelled
    #[error("task was cancelled")]
    Cancelled,

    /// The task was cancelled by a deadline (race-and-cancel timeout)
    #[error("task was cancelled by a deadline")]
    TimedOut,

    /// An I/O error surfaced by the reactor or a stream helper
    #[error("I/O error: {0}")]
    Io(String),

    /// A generation-checked handle referred to a slot that was reused
    #[error("stale task handle")]
    StaleHandle,

    /// A task failed and nobody was awaiting it; fatal so failures are
    /// never silently lost
    #[error("unhandled failure in detached task: {0}")]
    UnhandledFailure(Box<RuntimeError>),

    /// The scheduler ran out of work before the awaited task completed
    #[error("scheduler ran out of work before the awaited task completed")]
    Stalled,

    /// A task-defined failure
    #[error("task failed: {0}")]
    Other(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

/// Result alias for runtime operations.
pub type RtResult<T> = Result<T, RuntimeError>;
