//! Task structure and the suspend/resume contract
//!
//! A task is a resumable step function: each time the scheduler drives it,
//! it receives the [`Wake`] event that resumed it and reports back a
//! [`Step`]: a new suspend condition, or its final outcome. The only
//! place a task yields control is by returning
//! [`Step::Yield`]; there is no preemption.

use crate::arena::TaskRef;
use crate::reactor::Readiness;
use crate::ticks::Ticks;
use crate::RuntimeError;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// An I/O resource identity, as registered with the reactor.
pub type Fd = i32;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Just created, not yet driven
    Created,
    /// Currently executing its step function
    Running,
    /// Suspended on a wait condition
    Suspended,
    /// Ready to run (was suspended, now woken)
    Resumed,
    /// Cancellation requested; the stop signal is delivered at the next
    /// resumption point
    Cancelling,
    /// Completed with a result
    Completed,
    /// Failed with an error (including cancellation outcomes)
    Failed,
}

/// Why a task is being cancelled. A deadline cancellation surfaces as
/// [`RuntimeError::TimedOut`], distinct from an ordinary stop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelKind {
    /// Ordinary cooperative stop
    Stop,
    /// Deadline expiry in a race-and-cancel timeout
    Deadline,
}

/// Timer lane of a task.
///
/// Low-priority tasks sleep on a separate timer queue serviced only when the
/// normal lane is idle, bounded by the starvation guard. Predicate waits
/// ([`SuspendReason::UntilTrue`]) are polled ahead of both timer lanes no
/// matter which lane the task sleeps in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Default timer lane
    #[default]
    Normal,
    /// Deferred timer lane with a `max_overdue` starvation bound
    Low,
}

/// Condition a task names when it suspends.
pub enum SuspendReason {
    /// Resume after `delay` milliseconds
    SleepFor {
        /// Milliseconds from the current scheduler tick
        delay: u32,
    },
    /// Resume at an absolute wake time
    SleepUntil {
        /// Absolute wake tick
        wake_at: Ticks,
    },
    /// Resume when another task completes or fails
    AwaitTask(TaskRef),
    /// Resume when the fd is readable (one-shot reactor registration)
    Readable(Fd),
    /// Resume when the fd is writable (one-shot reactor registration)
    Writable(Fd),
    /// Resume when the predicate returns true; polled on every scheduler
    /// decision, ahead of all timer lanes
    UntilTrue(Box<dyn FnMut() -> bool + Send>),
}

impl fmt::Debug for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::SleepFor { delay } => write!(f, "SleepFor({delay}ms)"),
            SuspendReason::SleepUntil { wake_at } => write!(f, "SleepUntil({})", wake_at.raw()),
            SuspendReason::AwaitTask(r) => write!(f, "AwaitTask({r:?})"),
            SuspendReason::Readable(fd) => write!(f, "Readable({fd})"),
            SuspendReason::Writable(fd) => write!(f, "Writable({fd})"),
            SuspendReason::UntilTrue(_) => write!(f, "UntilTrue(..)"),
        }
    }
}

/// Result of a finished task: the completion value or the failure.
///
/// The value is collected exactly once, by the first awaiting party.
pub type TaskOutcome = Result<Box<dyn Any + Send>, RuntimeError>;

/// The event that resumed a task.
pub enum Wake {
    /// First resumption after spawn
    Start,
    /// The requested sleep elapsed
    Timer,
    /// The awaited fd reported readiness (or an error/hangup)
    Io(Readiness),
    /// The awaited predicate returned true
    Poll,
    /// The awaited task finished; `Ok(None)` means its result was already
    /// collected by an earlier awaiter
    Joined(Result<Option<Box<dyn Any + Send>>, RuntimeError>),
    /// Cooperative stop signal, delivered at this resumption point.
    /// Yielding again (rather than returning [`Step::Done`]) terminates the
    /// task with the corresponding cancellation outcome.
    Cancel(CancelKind),
}

impl fmt::Debug for Wake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wake::Start => write!(f, "Start"),
            Wake::Timer => write!(f, "Timer"),
            Wake::Io(r) => write!(f, "Io({r:?})"),
            Wake::Poll => write!(f, "Poll"),
            Wake::Joined(Ok(_)) => write!(f, "Joined(Ok)"),
            Wake::Joined(Err(e)) => write!(f, "Joined(Err({e}))"),
            Wake::Cancel(k) => write!(f, "Cancel({k:?})"),
        }
    }
}

/// What a task reports after being driven forward.
pub enum Step {
    /// Suspend on the given condition
    Yield(SuspendReason),
    /// Complete with a value
    Done(Box<dyn Any + Send>),
    /// Fail with an error
    Fail(RuntimeError),
}

impl Step {
    /// Complete with `value`.
    pub fn done<T: Any + Send>(value: T) -> Step {
        Step::Done(Box::new(value))
    }

    /// Suspend for `delay` milliseconds.
    pub fn sleep(delay: u32) -> Step {
        Step::Yield(SuspendReason::SleepFor { delay })
    }

    /// Suspend until the predicate holds.
    pub fn until(pred: impl FnMut() -> bool + Send + 'static) -> Step {
        Step::Yield(SuspendReason::UntilTrue(Box::new(pred)))
    }
}

/// A task body: driven with the wake event, reports the next step.
pub type StepFn = Box<dyn FnMut(Wake) -> Step + Send>;

/// Shared task record: identity, state, outcome, and waiters.
///
/// The step function itself is owned by the scheduler's arena; this record
/// is what handles, the registry, and cancellation observe.
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// User-assigned name, unique among live tasks
    name: Option<String>,

    /// Cancellation-group membership
    group: Option<String>,

    /// Timer lane
    priority: Priority,

    /// Current state
    state: AtomicCell<TaskState>,

    /// Pending cancellation, consumed at the next resumption point
    cancel_requested: AtomicCell<Option<CancelKind>>,

    /// Result (if finished); collected once
    outcome: Mutex<Option<TaskOutcome>>,

    /// Tasks waiting for this task to finish
    waiters: Mutex<Vec<TaskRef>>,
}

impl Task {
    /// Create a new task record.
    pub fn new(priority: Priority, name: Option<String>, group: Option<String>) -> Self {
        Self {
            id: TaskId::new(),
            name,
            group,
            priority,
            state: AtomicCell::new(TaskState::Created),
            cancel_requested: AtomicCell::new(None),
            outcome: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Get the task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task's name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the task's cancellation group, if any
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Get the task's timer lane
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        self.state.load()
    }

    /// Set the current state
    pub fn set_state(&self, state: TaskState) {
        self.state.store(state);
    }

    /// Whether the task has reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Completed | TaskState::Failed)
    }

    /// Request cooperative cancellation.
    ///
    /// Returns false if the task already finished or a cancellation is
    /// already pending (idempotent, never an error).
    pub fn request_cancel(&self, kind: CancelKind) -> bool {
        if self.is_finished() {
            return false;
        }
        if self.cancel_requested.load().is_some() {
            return false;
        }
        self.cancel_requested.store(Some(kind));
        true
    }

    /// Consume a pending cancellation request
    pub fn take_cancel_request(&self) -> Option<CancelKind> {
        self.cancel_requested.take()
    }

    /// Whether a cancellation is pending delivery
    pub fn cancel_pending(&self) -> bool {
        self.cancel_requested.load().is_some()
    }

    /// Record the task's outcome
    pub fn set_outcome(&self, outcome: TaskOutcome) {
        *self.outcome.lock() = Some(outcome);
    }

    /// Collect the outcome; subsequent calls return None
    pub fn take_outcome(&self) -> Option<TaskOutcome> {
        self.outcome.lock().take()
    }

    /// Add a task waiting for this one to finish
    pub fn add_waiter(&self, waiter: TaskRef) {
        self.waiters.lock().push(waiter);
    }

    /// Take all waiting tasks (used when this task finishes)
    pub fn take_waiters(&self) -> Vec<TaskRef> {
        std::mem::take(&mut *self.waiters.lock())
    }
}

/// Handle for awaiting a task's result.
///
/// The type parameter asserts the result type; the value is downcast when
/// collected and a mismatch is a [`crate::ProgrammingError::ResultType`].
pub struct TaskHandle<T> {
    task: TaskRef,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TaskHandle<T> {
    /// Create a handle for the given arena reference.
    pub fn new(task: TaskRef) -> Self {
        Self {
            task,
            _phantom: PhantomData,
        }
    }

    /// The generation-checked arena reference.
    pub fn task_ref(&self) -> TaskRef {
        self.task
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaskHandle<T> {}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({:?})", self.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_uniqueness() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_task_creation() {
        let task = Task::new(Priority::Normal, Some("gps".into()), Some("drivers".into()));
        assert_eq!(task.state(), TaskState::Created);
        assert_eq!(task.name(), Some("gps"));
        assert_eq!(task.group(), Some("drivers"));
        assert_eq!(task.priority(), Priority::Normal);
        assert!(!task.is_finished());
    }

    #[test]
    fn test_task_state_transitions() {
        let task = Task::new(Priority::Normal, None, None);
        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Running);
        task.set_state(TaskState::Suspended);
        assert_eq!(task.state(), TaskState::Suspended);
        task.set_state(TaskState::Completed);
        assert!(task.is_finished());
    }

    #[test]
    fn test_cancel_request_idempotent() {
        let task = Task::new(Priority::Normal, None, None);
        assert!(task.request_cancel(CancelKind::Stop));
        // A second request is a no-op
        assert!(!task.request_cancel(CancelKind::Deadline));
        assert_eq!(task.take_cancel_request(), Some(CancelKind::Stop));
        assert!(!task.cancel_pending());
    }

    #[test]
    fn test_cancel_after_finish_reports_not_cancellable() {
        let task = Task::new(Priority::Normal, None, None);
        task.set_state(TaskState::Completed);
        assert!(!task.request_cancel(CancelKind::Stop));
    }

    #[test]
    fn test_outcome_collected_once() {
        let task = Task::new(Priority::Normal, None, None);
        task.set_outcome(Ok(Box::new(42i32)));
        let first = task.take_outcome();
        assert!(first.is_some());
        assert!(task.take_outcome().is_none());
    }

    #[test]
    fn test_waiters_fifo() {
        let task = Task::new(Priority::Normal, None, None);
        let a = TaskRef::new(0, 1);
        let b = TaskRef::new(1, 1);
        task.add_waiter(a);
        task.add_waiter(b);
        assert_eq!(task.take_waiters(), vec![a, b]);
        assert!(task.take_waiters().is_empty());
    }
}
