//! Scheduler core
//!
//! The run loop merges four wake sources into a single next-to-run decision:
//!
//! 1. Predicate lane: user-supplied predicates, polled in registration
//!    order; a predicate returning true wins immediately. Any task that
//!    suspends on a predicate enters this lane, whatever its timer lane.
//! 2. Ready queue: tasks already woken (spawn, I/O readiness, join,
//!    cancellation), dispatched FIFO.
//! 3. Timer lanes: the earliest due normal-lane entry, unless a due low-lane
//!    entry has reached its `max_overdue` bound (starvation guard).
//! 4. The reactor: when nothing is due the loop blocks on readiness polling
//!    for `min(time-to-next-normal, time-to-next-low)`.
//!
//! Ties within a lane break on insertion order, so equal-urgency tasks are
//! serviced fairly rather than merely correctly.

use crate::arena::{TaskArena, TaskEntry, TaskRef};
use crate::reactor::Reactor;
use crate::task::{
    CancelKind, Step, StepFn, SuspendReason, Task, TaskHandle, TaskOutcome, TaskState, Wake,
};
use crate::ticks::{ticks_add, ticks_diff, Clock, SystemClock, Ticks};
use crate::timer::TimerQueue;
use crate::{ProgrammingError, RtResult, RuntimeError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub use crate::task::Priority;

/// Tuning knobs for the scheduler's fairness and polling behavior.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How many milliseconds a due low-lane timer may be deferred behind
    /// normal-lane work before the starvation guard services it anyway.
    pub max_overdue: u32,

    /// Upper bound on one reactor block while predicates are registered, in
    /// milliseconds. Predicates are re-polled at least this often.
    pub poll_interval: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_overdue: 100,
            poll_interval: 1,
        }
    }
}

/// Options for [`Scheduler::spawn_with`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Task name, unique among live tasks
    pub name: Option<String>,
    /// Cancellation-group membership
    pub group: Option<String>,
    /// Timer lane
    pub priority: Priority,
}

impl SpawnOptions {
    /// Default options: unnamed, ungrouped, normal priority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a name, unique among live tasks.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Join a cancellation group.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Pick a timer lane.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// What a timer entry does when it fires, resolved at scheduling time.
pub(crate) enum Runnable {
    /// Resume a suspended task
    Resume(TaskRef),
    /// Run a plain callback
    Run(Box<dyn FnOnce() + Send>),
    /// Deliver a cancellation signal
    Cancel(TaskRef, CancelKind),
}

pub(crate) enum Command {
    Cancel(TaskRef, CancelKind),
    CancelNamed(String, CancelKind),
    CancelGroup(String, CancelKind),
}

/// Cloneable handle for requesting cancellations from task bodies or other
/// threads. Commands are applied at the start of the next scheduler turn.
#[derive(Clone, Default)]
pub struct Remote {
    commands: Arc<Mutex<Vec<Command>>>,
}

impl Remote {
    /// Request cooperative cancellation of a task.
    pub fn cancel(&self, task: TaskRef) {
        self.commands.lock().push(Command::Cancel(task, CancelKind::Stop));
    }

    /// Request cancellation of a task by its live name.
    pub fn cancel_named(&self, name: &str) {
        self.commands
            .lock()
            .push(Command::CancelNamed(name.to_owned(), CancelKind::Stop));
    }

    /// Request cancellation of every live task in a group.
    pub fn cancel_group(&self, group: &str) {
        self.commands
            .lock()
            .push(Command::CancelGroup(group.to_owned(), CancelKind::Stop));
    }

    fn drain(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

/// The single-threaded cooperative scheduler.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    pub(crate) arena: TaskArena,
    pub(crate) names: FxHashMap<String, TaskRef>,
    ready: VecDeque<(TaskRef, Wake)>,
    timers: TimerQueue<Runnable>,
    low_timers: TimerQueue<Runnable>,
    poll_lane: Vec<TaskRef>,
    reactor: Reactor,
    remote: Remote,
    root: Option<TaskRef>,
    fatal: Option<RuntimeError>,
}

impl Scheduler {
    /// Create a scheduler on the wall clock with default configuration.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()), SchedulerConfig::default())
    }

    /// Create a scheduler on an explicit clock and configuration.
    pub fn with_clock(clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            clock,
            config,
            arena: TaskArena::new(),
            names: FxHashMap::default(),
            ready: VecDeque::new(),
            timers: TimerQueue::new(),
            low_timers: TimerQueue::new(),
            poll_lane: Vec::new(),
            reactor: Reactor::new(),
            remote: Remote::default(),
            root: None,
            fatal: None,
        }
    }

    /// The scheduler's current tick.
    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    /// A cancellation handle usable from task bodies and other threads.
    pub fn remote(&self) -> Remote {
        self.remote.clone()
    }

    /// Number of live tasks (suspended, ready, or finished-but-uncollected).
    pub fn live_tasks(&self) -> usize {
        self.arena.live_count()
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Spawn an unnamed task at normal priority.
    pub fn spawn<T, F>(&mut self, body: F) -> TaskHandle<T>
    where
        T: Any + Send,
        F: FnMut(Wake) -> Step + Send + 'static,
    {
        self.spawn_inner(SpawnOptions::default(), Box::new(body))
    }

    /// Spawn a task with explicit options.
    ///
    /// Fails with [`ProgrammingError::DuplicateName`] if the name is still
    /// held by a live task; names free up on completion.
    pub fn spawn_with<T, F>(&mut self, options: SpawnOptions, body: F) -> RtResult<TaskHandle<T>>
    where
        T: Any + Send,
        F: FnMut(Wake) -> Step + Send + 'static,
    {
        if let Some(name) = &options.name {
            if self.names.contains_key(name) {
                return Err(ProgrammingError::DuplicateName(name.clone()).into());
            }
        }
        Ok(self.spawn_inner(options, Box::new(body)))
    }

    fn spawn_inner<T>(&mut self, options: SpawnOptions, body: StepFn) -> TaskHandle<T> {
        let task = Arc::new(Task::new(options.priority, options.name, options.group));
        let id = task.id();
        let name = task.name().map(str::to_owned);
        let r = self.arena.insert(TaskEntry::new(task, body));
        if let Some(name) = name {
            self.names.insert(name, r);
        }
        self.ready.push_back((r, Wake::Start));
        log::trace!("spawned task {id:?} as {r:?}");
        TaskHandle::new(r)
    }

    /// Schedule a plain callback to run after `delay` milliseconds.
    pub fn call_later(&mut self, delay: u32, f: impl FnOnce() + Send + 'static) {
        let wake_at = ticks_add(self.clock.now(), delay);
        self.timers.push(wake_at, Runnable::Run(Box::new(f)));
    }

    /// Schedule a plain callback to run at an absolute tick.
    pub fn call_at(&mut self, wake_at: Ticks, f: impl FnOnce() + Send + 'static) {
        self.timers.push(wake_at, Runnable::Run(Box::new(f)));
    }

    /// Schedule delivery of a cancellation signal after `delay` milliseconds.
    /// Used to race a deadline against an awaited condition.
    pub fn cancel_after(&mut self, task: TaskRef, delay: u32, kind: CancelKind) {
        let wake_at = ticks_add(self.clock.now(), delay);
        self.timers.push(wake_at, Runnable::Cancel(task, kind));
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Drive the scheduler until `handle`'s task finishes, then collect and
    /// downcast its result.
    ///
    /// Returns [`RuntimeError::Stalled`] if the scheduler runs out of work
    /// first, and the root task's own failure (including cancellation
    /// outcomes) if it fails.
    pub fn run_until<T: Any + Send>(&mut self, handle: TaskHandle<T>) -> RtResult<T> {
        let r = handle.task_ref();
        self.root = Some(r);
        let outcome = self.run_root(r);
        self.root = None;
        match outcome? {
            Ok(v) => v
                .downcast::<T>()
                .map(|b| *b)
                .map_err(|_| ProgrammingError::ResultType.into()),
            Err(e) => Err(e),
        }
    }

    fn run_root(&mut self, r: TaskRef) -> RtResult<TaskOutcome> {
        loop {
            let Some(task) = self.arena.task(r) else {
                return Err(RuntimeError::StaleHandle);
            };
            if task.is_finished() {
                self.arena.remove(r);
                return task.take_outcome().ok_or(RuntimeError::StaleHandle);
            }
            if !self.turn()? {
                return Err(RuntimeError::Stalled);
            }
        }
    }

    /// Drive the scheduler until it is quiescent: no ready tasks, no timers,
    /// no registered predicates, and no reactor registrations.
    ///
    /// An unhandled failure in a task nobody awaits stops the loop with
    /// [`RuntimeError::UnhandledFailure`].
    pub fn run_forever(&mut self) -> RtResult<()> {
        while self.turn()? {}
        Ok(())
    }

    /// Make one scheduling decision. Returns `Ok(false)` when quiescent.
    pub fn turn(&mut self) -> RtResult<bool> {
        if let Some(e) = self.fatal.take() {
            return Err(e);
        }
        self.drain_remote();

        // 1. Predicate lane: first true predicate wins outright.
        if let Some(r) = self.poll_predicate_lane() {
            self.resume(r, Wake::Poll);
            return Ok(true);
        }

        // 2. Already-woken tasks, FIFO.
        if let Some((r, wake)) = self.ready.pop_front() {
            self.resume(r, wake);
            return Ok(true);
        }

        // 3. Timer lanes. Stale entries (their task was woken some other
        // way) are skipped and draining continues.
        loop {
            let now = self.clock.now();
            let normal_due = self
                .timers
                .peek_soonest()
                .is_some_and(|t| ticks_diff(now, t) >= 0);
            let low_overdue = self
                .low_timers
                .peek_soonest()
                .map(|t| ticks_diff(now, t))
                .filter(|&d| d >= 0);

            let popped = match low_overdue {
                Some(over) if !normal_due || over >= self.config.max_overdue as i32 => {
                    self.low_timers.pop_soonest()
                }
                Some(_) => self.timers.pop_soonest(),
                None if normal_due => self.timers.pop_soonest(),
                None => None,
            };
            let Some((wake_at, runnable)) = popped else {
                break;
            };
            if self.fire(wake_at, runnable) {
                return Ok(true);
            }
        }

        // 4. Nothing runnable: block on the reactor until the next timer,
        // or report quiescence.
        self.block()
    }

    fn drain_remote(&mut self) {
        for cmd in self.remote.drain() {
            match cmd {
                Command::Cancel(r, kind) => {
                    self.cancel_task(r, kind);
                }
                Command::CancelNamed(name, kind) => {
                    if let Some(&r) = self.names.get(&name) {
                        self.cancel_task(r, kind);
                    }
                }
                Command::CancelGroup(group, kind) => {
                    for r in self.group_members(&group) {
                        self.cancel_task(r, kind);
                    }
                }
            }
        }
    }

    /// Live, unfinished members of a cancellation group, in slot order.
    pub(crate) fn group_members(&self, group: &str) -> Vec<TaskRef> {
        self.arena
            .live_refs()
            .into_iter()
            .filter(|&r| {
                matches!(self.arena.get(r),
                    Some(e) if !e.task.is_finished() && e.task.group() == Some(group))
            })
            .collect()
    }

    /// Poll registered predicates in registration order; the first true one
    /// wins. Entries whose task is gone or no longer predicate-suspended are
    /// purged.
    fn poll_predicate_lane(&mut self) -> Option<TaskRef> {
        if self.poll_lane.is_empty() {
            return None;
        }
        let mut chosen = None;
        let lane = std::mem::take(&mut self.poll_lane);
        let mut kept = Vec::with_capacity(lane.len());
        for r in lane {
            if chosen.is_some() {
                kept.push(r);
                continue;
            }
            let Some(entry) = self.arena.get_mut(r) else {
                continue;
            };
            if entry.task.state() != TaskState::Suspended {
                continue;
            }
            let Some(SuspendReason::UntilTrue(pred)) = entry.wait.as_mut() else {
                continue;
            };
            if pred() {
                entry.wait = None;
                chosen = Some(r);
            } else {
                kept.push(r);
            }
        }
        self.poll_lane = kept;
        chosen
    }

    /// Act on a fired timer entry. Returns false if the entry was stale.
    fn fire(&mut self, wake_at: Ticks, runnable: Runnable) -> bool {
        match runnable {
            Runnable::Resume(r) => {
                let live = matches!(self.arena.get(r),
                    Some(e) if e.task.state() == TaskState::Suspended
                        && matches!(e.wait,
                            Some(SuspendReason::SleepUntil { wake_at: t }) if t == wake_at));
                if !live {
                    return false;
                }
                if let Some(entry) = self.arena.get_mut(r) {
                    entry.wait = None;
                }
                self.resume(r, Wake::Timer);
                true
            }
            Runnable::Run(f) => {
                f();
                true
            }
            Runnable::Cancel(r, kind) => self.cancel_task(r, kind),
        }
    }

    /// Block on the reactor until the next timer deadline, or report
    /// quiescence when no wake source remains.
    fn block(&mut self) -> RtResult<bool> {
        let next_timer = match (self.timers.peek_soonest(), self.low_timers.peek_soonest()) {
            (Some(a), Some(b)) => Some(if ticks_diff(a, b) <= 0 { a } else { b }),
            (a, b) => a.or(b),
        };
        let polling = !self.poll_lane.is_empty();
        if next_timer.is_none()
            && !polling
            && !self.reactor.has_registrations()
            && self.remote.is_empty()
        {
            return Ok(false);
        }

        let now = self.clock.now();
        let wait_ms = match next_timer {
            Some(t) => {
                let mut ms = ticks_diff(t, now).max(0) as u32;
                if polling {
                    ms = ms.min(self.config.poll_interval);
                }
                Some(ms)
            }
            None if polling => Some(self.config.poll_interval),
            None => None,
        };
        let timeout = match wait_ms {
            // A clock that consumes the idle period itself (manual clocks in
            // tests) turns the block into a zero-timeout readiness check.
            Some(ms) if self.clock.consume_idle(ticks_add(now, ms)) => {
                Some(Duration::from_millis(0))
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };

        let woken = self.reactor.wait(timeout)?;
        for (r, readiness) in woken {
            if let Some(entry) = self.arena.get_mut(r) {
                if entry.task.state() == TaskState::Suspended {
                    entry.wait = None;
                    entry.task.set_state(TaskState::Resumed);
                    self.ready.push_back((r, Wake::Io(readiness)));
                }
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Task lifecycle
    // ========================================================================

    /// Request cooperative cancellation of a task.
    ///
    /// Returns false if the task is gone, already finished, or already has a
    /// pending cancellation (idempotent, never an error). A suspended target
    /// is woken so the signal is delivered promptly rather than when its
    /// original wait would have fired.
    pub fn cancel_task(&mut self, r: TaskRef, kind: CancelKind) -> bool {
        let Some(entry) = self.arena.get_mut(r) else {
            return false;
        };
        let task = entry.task.clone();
        if !task.request_cancel(kind) {
            return false;
        }
        log::debug!("cancel requested for task {:?} ({kind:?})", task.id());
        if task.state() == TaskState::Suspended {
            let wait = entry.wait.take();
            task.set_state(TaskState::Resumed);
            match wait {
                Some(SuspendReason::Readable(fd)) => {
                    self.reactor.remove_reader(fd);
                }
                Some(SuspendReason::Writable(fd)) => {
                    self.reactor.remove_writer(fd);
                }
                _ => {}
            }
            self.ready.push_back((r, Wake::Cancel(kind)));
        }
        true
    }

    /// Drive a task forward with `wake` until it suspends or finishes.
    fn resume(&mut self, r: TaskRef, mut wake: Wake) {
        let (task, mut body) = {
            let Some(entry) = self.arena.get_mut(r) else {
                return;
            };
            if entry.task.is_finished() {
                return;
            }
            let Some(body) = entry.body.take() else {
                return;
            };
            entry.wait = None;
            (entry.task.clone(), body)
        };

        // A pending cancellation overrides whatever wake was queued; the
        // signal travels through the same channel as ordinary wake-ups.
        if let Some(kind) = task.take_cancel_request() {
            wake = Wake::Cancel(kind);
        }
        let cancelling = match wake {
            Wake::Cancel(kind) => Some(kind),
            _ => None,
        };
        task.set_state(match cancelling {
            Some(_) => TaskState::Cancelling,
            None => TaskState::Running,
        });
        log::trace!("resume {r:?} with {wake:?}");

        match body(wake) {
            Step::Yield(reason) => {
                if let Some(kind) = cancelling {
                    // The task observed the stop signal, ran its cleanup, and
                    // yielded again: it terminates with the cancellation
                    // outcome.
                    self.finish(r, Err(cancel_error(kind)));
                } else {
                    self.park(r, body, reason, &task);
                }
            }
            Step::Done(v) => self.finish(r, Ok(v)),
            Step::Fail(e) => self.finish(r, Err(e)),
        }
    }

    /// Record a task's new suspend condition and register its wake source.
    fn park(&mut self, r: TaskRef, body: StepFn, reason: SuspendReason, task: &Arc<Task>) {
        task.set_state(TaskState::Suspended);
        match reason {
            SuspendReason::SleepFor { delay } => {
                let wake_at = ticks_add(self.clock.now(), delay);
                self.park_timer(r, body, wake_at, task);
            }
            SuspendReason::SleepUntil { wake_at } => {
                self.park_timer(r, body, wake_at, task);
            }
            SuspendReason::UntilTrue(pred) => {
                if let Some(entry) = self.arena.get_mut(r) {
                    entry.body = Some(body);
                    entry.wait = Some(SuspendReason::UntilTrue(pred));
                }
                if !self.poll_lane.contains(&r) {
                    self.poll_lane.push(r);
                }
            }
            SuspendReason::AwaitTask(target) => {
                self.park_await(r, body, target, task);
            }
            SuspendReason::Readable(fd) => {
                if let Some(entry) = self.arena.get_mut(r) {
                    entry.body = Some(body);
                    entry.wait = Some(SuspendReason::Readable(fd));
                }
                if let Err(e) = self.reactor.add_reader(fd, r) {
                    self.finish(r, Err(e.into()));
                }
            }
            SuspendReason::Writable(fd) => {
                if let Some(entry) = self.arena.get_mut(r) {
                    entry.body = Some(body);
                    entry.wait = Some(SuspendReason::Writable(fd));
                }
                if let Err(e) = self.reactor.add_writer(fd, r) {
                    self.finish(r, Err(e.into()));
                }
            }
        }
    }

    fn park_timer(&mut self, r: TaskRef, body: StepFn, wake_at: Ticks, task: &Arc<Task>) {
        if let Some(entry) = self.arena.get_mut(r) {
            entry.body = Some(body);
            entry.wait = Some(SuspendReason::SleepUntil { wake_at });
        }
        match task.priority() {
            Priority::Low => self.low_timers.push(wake_at, Runnable::Resume(r)),
            _ => self.timers.push(wake_at, Runnable::Resume(r)),
        }
    }

    fn park_await(&mut self, r: TaskRef, body: StepFn, target: TaskRef, task: &Arc<Task>) {
        // An already-finished target delivers its outcome immediately; a
        // target whose slot was reused surfaces as a stale handle.
        type Delivered = Result<Option<Box<dyn Any + Send>>, RuntimeError>;
        let now_result: Option<(Delivered, bool)> = match self.arena.get(target) {
            None => Some((Err(RuntimeError::StaleHandle), false)),
            Some(te) if te.task.is_finished() => match te.task.take_outcome() {
                Some(Ok(v)) => Some((Ok(Some(v)), true)),
                Some(Err(e)) => Some((Err(e), true)),
                // Collected by an earlier awaiter
                None => Some((Ok(None), false)),
            },
            Some(_) => None,
        };

        match now_result {
            Some((res, collect)) => {
                if collect {
                    self.arena.remove(target);
                }
                if let Some(entry) = self.arena.get_mut(r) {
                    entry.body = Some(body);
                    entry.task.set_state(TaskState::Resumed);
                }
                self.ready.push_back((r, Wake::Joined(res)));
            }
            None => {
                if let Some(target_task) = self.arena.task(target) {
                    target_task.add_waiter(r);
                }
                if let Some(entry) = self.arena.get_mut(r) {
                    entry.body = Some(body);
                    entry.wait = Some(SuspendReason::AwaitTask(target));
                }
                task.set_state(TaskState::Suspended);
            }
        }
    }

    /// Record a task's terminal state, deliver its outcome, and run exit
    /// hooks.
    fn finish(&mut self, r: TaskRef, outcome: TaskOutcome) {
        let Some(entry) = self.arena.get_mut(r) else {
            return;
        };
        let task = entry.task.clone();
        let hooks = std::mem::take(&mut entry.exit_hooks);
        entry.body = None;
        entry.wait = None;

        let failed = outcome.is_err();
        task.set_state(if failed {
            TaskState::Failed
        } else {
            TaskState::Completed
        });
        if let Some(name) = task.name() {
            self.names.remove(name);
        }
        log::debug!("task {:?} finished (failed: {failed})", task.id());

        // Only waiters still suspended receive the join; a waiter that was
        // cancelled in the meantime gets its stop signal instead.
        let waiters: Vec<TaskRef> = task
            .take_waiters()
            .into_iter()
            .filter(|&w| {
                matches!(self.arena.get(w), Some(e) if e.task.state() == TaskState::Suspended)
            })
            .collect();

        if waiters.is_empty() {
            match outcome {
                // A failure nobody observes is fatal to the run loop rather
                // than silently lost. Cancellation outcomes are expected
                // terminations, not lost failures.
                Err(e)
                    if self.root != Some(r)
                        && !matches!(e, RuntimeError::Cancelled | RuntimeError::TimedOut) =>
                {
                    self.arena.remove(r);
                    self.fatal = Some(RuntimeError::UnhandledFailure(Box::new(e)));
                }
                other => task.set_outcome(other),
            }
        } else {
            match outcome {
                Ok(v) => {
                    // First waiter collects the value; the rest learn only
                    // that the task completed.
                    let mut value = Some(v);
                    for w in waiters {
                        let res = Ok(value.take());
                        self.wake_waiter(w, res);
                    }
                }
                Err(e) => {
                    for w in waiters {
                        self.wake_waiter(w, Err(e.clone()));
                    }
                }
            }
            self.arena.remove(r);
        }

        for hook in hooks {
            hook();
        }
    }

    fn wake_waiter(&mut self, w: TaskRef, res: Result<Option<Box<dyn Any + Send>>, RuntimeError>) {
        if let Some(entry) = self.arena.get_mut(w) {
            if entry.task.state() == TaskState::Suspended {
                entry.wait = None;
                entry.task.set_state(TaskState::Resumed);
                self.ready.push_back((w, Wake::Joined(res)));
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_error(kind: CancelKind) -> RuntimeError {
    match kind {
        CancelKind::Stop => RuntimeError::Cancelled,
        CancelKind::Deadline => RuntimeError::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manual_scheduler() -> Scheduler {
        Scheduler::with_clock(
            Arc::new(ManualClock::new(Ticks::new(0))),
            SchedulerConfig::default(),
        )
    }

    #[test]
    fn test_run_until_returns_value() {
        let mut sched = manual_scheduler();
        let handle = sched.spawn::<i32, _>(|_| Step::done(42i32));
        assert_eq!(sched.run_until(handle).unwrap(), 42);
        assert_eq!(sched.live_tasks(), 0);
    }

    #[test]
    fn test_result_type_mismatch() {
        let mut sched = manual_scheduler();
        let handle = sched.spawn::<String, _>(|_| Step::done(42i32));
        assert_eq!(
            sched.run_until(handle),
            Err(ProgrammingError::ResultType.into())
        );
    }

    #[test]
    fn test_sleep_resumes_after_delay() {
        let mut sched = manual_scheduler();
        let mut slept = false;
        let handle = sched.spawn::<u32, _>(move |wake| {
            if slept {
                assert!(matches!(wake, Wake::Timer));
                return Step::done(7u32);
            }
            slept = true;
            Step::sleep(500)
        });
        assert_eq!(sched.run_until(handle).unwrap(), 7);
        // The manual clock consumed the idle period
        assert!(ticks_diff(sched.now(), Ticks::new(500)) >= 0);
    }

    #[test]
    fn test_equal_wake_times_run_in_spawn_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut sched = manual_scheduler();
        for i in 0..5 {
            let order = order.clone();
            let mut slept = false;
            sched.spawn::<(), _>(move |_| {
                if slept {
                    order.lock().push(i);
                    return Step::done(());
                }
                slept = true;
                Step::Yield(SuspendReason::SleepUntil {
                    wake_at: Ticks::new(100),
                })
            });
        }
        sched.run_forever().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_run_forever_quiescent_exit() {
        let mut sched = manual_scheduler();
        sched.spawn::<(), _>(|_| Step::done(()));
        sched.run_forever().unwrap();
        assert!(!sched.turn().unwrap());
    }

    #[test]
    fn test_run_until_stalls_on_deadlock() {
        let mut sched = manual_scheduler();
        let own_ref = Arc::new(Mutex::new(None::<TaskRef>));
        let cell = own_ref.clone();
        let blocked = sched.spawn::<(), _>(move |wake| match wake {
            // Awaits itself: nothing can ever wake it
            Wake::Start => Step::Yield(SuspendReason::AwaitTask(cell.lock().unwrap())),
            _ => Step::done(()),
        });
        *own_ref.lock() = Some(blocked.task_ref());
        assert_eq!(sched.run_until(blocked), Err(RuntimeError::Stalled));
    }

    #[test]
    fn test_await_stale_handle_reports_error() {
        let mut sched = manual_scheduler();
        let blocked = sched.spawn::<(), _>(|wake| match wake {
            // Awaits a slot that was never allocated
            Wake::Start => Step::Yield(SuspendReason::AwaitTask(TaskRef::new(99, 99))),
            Wake::Joined(Err(e)) => Step::Fail(e),
            other => panic!("unexpected wake {other:?}"),
        });
        assert_eq!(sched.run_until(blocked), Err(RuntimeError::StaleHandle));
    }

    #[test]
    fn test_call_later_runs_callback() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut sched = manual_scheduler();
        let f = fired.clone();
        sched.call_later(50, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        sched.run_forever().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_predicate_lane_wins_next_decision() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let flag = Arc::new(AtomicU32::new(0));
        let mut sched = manual_scheduler();

        let o = order.clone();
        let f = flag.clone();
        let mut waiting = false;
        sched.spawn::<(), _>(move |_| {
            if waiting {
                o.lock().push("predicate");
                return Step::done(());
            }
            waiting = true;
            let f = f.clone();
            Step::until(move || f.load(Ordering::SeqCst) != 0)
        });

        let o = order.clone();
        let f = flag.clone();
        let mut step = 0;
        sched.spawn::<(), _>(move |_| {
            step += 1;
            match step {
                // Set the predicate's flag, then ask for another slice; the
                // predicate-lane task must run before this one does.
                1 => {
                    f.store(1, Ordering::SeqCst);
                    Step::sleep(0)
                }
                _ => {
                    o.lock().push("normal");
                    Step::done(())
                }
            }
        });

        sched.run_forever().unwrap();
        assert_eq!(*order.lock(), vec!["predicate", "normal"]);
    }

    #[test]
    fn test_duplicate_name_rejected_until_completion() {
        let mut sched = manual_scheduler();
        let first = sched
            .spawn_with::<(), _>(SpawnOptions::new().named("gps"), |_| Step::done(()))
            .unwrap();
        assert!(matches!(
            sched.spawn_with::<(), _>(SpawnOptions::new().named("gps"), |_| Step::done(())),
            Err(RuntimeError::Programming(
                ProgrammingError::DuplicateName(_)
            ))
        ));
        sched.run_until(first).unwrap();
        // Name re-use after completion is legal
        sched
            .spawn_with::<(), _>(SpawnOptions::new().named("gps"), |_| Step::done(()))
            .unwrap();
    }

    #[test]
    fn test_await_collects_result() {
        let mut sched = manual_scheduler();
        let producer = sched.spawn::<i32, _>(|_| Step::done(5i32));
        let consumer = sched.spawn::<i32, _>(move |wake| match wake {
            Wake::Start => Step::Yield(SuspendReason::AwaitTask(producer.task_ref())),
            Wake::Joined(Ok(Some(v))) => {
                let v = *v.downcast::<i32>().unwrap();
                Step::done(v * 2)
            }
            other => panic!("unexpected wake {other:?}"),
        });
        assert_eq!(sched.run_until(consumer).unwrap(), 10);
    }

    #[test]
    fn test_unawaited_failure_is_fatal() {
        let mut sched = manual_scheduler();
        sched.spawn::<(), _>(|_| Step::Fail(RuntimeError::Other("boom".into())));
        assert!(matches!(
            sched.run_forever(),
            Err(RuntimeError::UnhandledFailure(_))
        ));
        // The scheduler is restartable after the failure
        let ok = sched.spawn::<i32, _>(|_| Step::done(1i32));
        assert_eq!(sched.run_until(ok).unwrap(), 1);
    }

    #[test]
    fn test_cancel_wakes_sleeping_task_promptly() {
        let mut sched = manual_scheduler();
        let sleeper = sched.spawn::<i32, _>(|wake| match wake {
            Wake::Start => Step::sleep(4000),
            Wake::Timer => Step::done(42i32),
            // Observes the stop signal and yields again: terminates cancelled
            Wake::Cancel(_) => Step::sleep(0),
            other => panic!("unexpected wake {other:?}"),
        });
        let remote = sched.remote();
        let target = sleeper.task_ref();
        sched.call_later(1000, move || remote.cancel(target));

        let err = sched.run_until(sleeper);
        assert_eq!(err, Err(RuntimeError::Cancelled));
        // Delivered at ~1s, not ~4s
        let now = sched.now();
        assert!(ticks_diff(now, Ticks::new(1000)) >= 0);
        assert!(ticks_diff(now, Ticks::new(4000)) < 0);
    }

    #[test]
    fn test_done_suppresses_cancellation() {
        let mut sched = manual_scheduler();
        let task = sched.spawn::<i32, _>(|wake| match wake {
            Wake::Start => Step::sleep(100),
            // Finishing at the stop signal completes normally
            Wake::Cancel(_) => Step::done(9i32),
            _ => Step::done(0i32),
        });
        let remote = sched.remote();
        let target = task.task_ref();
        sched.call_later(10, move || remote.cancel(target));
        assert_eq!(sched.run_until(task).unwrap(), 9);
    }

    #[test]
    fn test_low_lane_starvation_bound() {
        let clock = Arc::new(ManualClock::new(Ticks::new(0)));
        let mut sched = Scheduler::with_clock(
            clock.clone(),
            SchedulerConfig {
                max_overdue: 30,
                poll_interval: 1,
            },
        );

        // A low task due at t=10 records when it actually ran.
        let low_ran_at = Arc::new(Mutex::new(None::<Ticks>));
        let recorded = low_ran_at.clone();
        let observer = clock.clone();
        let mut slept = false;
        sched
            .spawn_with::<(), _>(SpawnOptions::new().priority(Priority::Low), move |_| {
                if slept {
                    *recorded.lock() = Some(observer.now());
                    return Step::done(());
                }
                slept = true;
                Step::Yield(SuspendReason::SleepUntil {
                    wake_at: Ticks::new(10),
                })
            })
            .unwrap();

        // A normal task that advances time 2ms per run and re-sleeps for
        // zero keeps the normal lane continuously due: without the guard the
        // low task would wait out all 100 laps.
        let ticking = clock.clone();
        let mut laps = 0u32;
        sched.spawn::<(), _>(move |_| {
            ticking.advance(2);
            laps += 1;
            if laps > 100 {
                return Step::done(());
            }
            Step::sleep(0)
        });

        sched.run_forever().unwrap();
        let ran_at = low_ran_at.lock().unwrap();
        let overdue = ticks_diff(ran_at, Ticks::new(10));
        // Due at t=10, serviced no later than t + max_overdue.
        assert!(overdue >= 0);
        assert!(overdue <= 30, "low task ran {overdue}ms overdue");
    }

    #[test]
    fn test_predicate_lane_admits_any_timer_lane() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let flag = Arc::new(AtomicU32::new(0));
        let mut sched = manual_scheduler();

        // A low-lane task suspended on a predicate still wins the decision
        // ahead of a due normal-lane timer.
        let o = order.clone();
        let f = flag.clone();
        let mut waiting = false;
        sched
            .spawn_with::<(), _>(SpawnOptions::new().priority(Priority::Low), move |_| {
                if waiting {
                    o.lock().push("predicate");
                    return Step::done(());
                }
                waiting = true;
                let f = f.clone();
                Step::until(move || f.load(Ordering::SeqCst) != 0)
            })
            .unwrap();

        let o = order.clone();
        let f = flag.clone();
        let mut step = 0;
        sched.spawn::<(), _>(move |_| {
            step += 1;
            match step {
                1 => {
                    f.store(1, Ordering::SeqCst);
                    Step::sleep(0)
                }
                _ => {
                    o.lock().push("timer");
                    Step::done(())
                }
            }
        });

        sched.run_forever().unwrap();
        assert_eq!(*order.lock(), vec!["predicate", "timer"]);
    }
}
