//! Condition variable built from a Lock and per-waiter Events

use super::{Event, Lock};
use crate::task::{Step, TaskId};
use crate::ProgrammingError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A condition variable over a [`Lock`].
///
/// Each waiter gets a fresh [`Event`]; `notify` sets waiter events in
/// arrival order. Because a step-function task cannot block inline, waiting
/// is split into phases driven by the task body:
///
/// ```ignore
/// // holding the lock, decide to wait:
/// let ev = cond.begin_wait(me)?;           // releases the lock
/// // suspend until notified:
/// Step::until({ let ev = ev.clone(); move || ev.is_set() })
/// // on resume, take the lock back before touching shared state:
/// Step::until({ let l = cond.lock().clone(); move || l.try_acquire(me) })
/// // then re-check the predicate and possibly wait again
/// ```
///
/// [`Condition::wait_for`] packages that whole loop, re-checking the
/// predicate under the lock after every wake.
///
/// Both `begin_wait` and `notify` fail fast when the caller does not hold
/// the lock, since the waiter queue is only consistent under it.
#[derive(Clone)]
pub struct Condition {
    lock: Lock,
    waiters: Arc<Mutex<VecDeque<Event>>>,
}

impl Condition {
    /// Create a condition variable over `lock`.
    pub fn new(lock: Lock) -> Self {
        Self {
            lock,
            waiters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// The underlying lock.
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Register as a waiter and release the lock.
    ///
    /// The caller must currently hold the lock. The returned event is set
    /// when the waiter is notified; the caller suspends on it and must
    /// re-acquire the lock on wake before touching the shared state.
    pub fn begin_wait(&self, me: TaskId) -> Result<Event, ProgrammingError> {
        if self.lock.holder() != Some(me) {
            return Err(ProgrammingError::ConditionLockNotHeld);
        }
        let event = Event::new();
        self.waiters.lock().push_back(event.clone());
        self.lock.release(me)?;
        Ok(event)
    }

    /// Wake up to `n` waiters, in arrival order. Returns how many were
    /// actually woken. The caller must hold the lock.
    pub fn notify(&self, me: TaskId, n: usize) -> Result<usize, ProgrammingError> {
        if self.lock.holder() != Some(me) {
            return Err(ProgrammingError::ConditionLockNotHeld);
        }
        let mut waiters = self.waiters.lock();
        let mut woken = 0;
        while woken < n {
            match waiters.pop_front() {
                Some(event) => {
                    event.set();
                    woken += 1;
                }
                None => break,
            }
        }
        Ok(woken)
    }

    /// Wake every waiter. The caller must hold the lock.
    pub fn notify_all(&self, me: TaskId) -> Result<usize, ProgrammingError> {
        self.notify(me, usize::MAX)
    }

    /// Number of registered waiters.
    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Begin a predicate wait: park until notified, re-acquire the lock,
    /// re-check the predicate, and park again while it stays false.
    ///
    /// The caller must hold the lock; drive the returned [`WaitFor`] on
    /// every resume.
    pub fn wait_for<P: FnMut() -> bool>(&self, me: TaskId, pred: P) -> WaitFor<P> {
        WaitFor {
            cond: self.clone(),
            me,
            pred,
            phase: Phase::Checking,
        }
    }
}

/// Progress of a [`WaitFor`] predicate wait.
pub enum WaitProgress {
    /// The predicate holds and the caller holds the lock again
    Ready,
    /// Yield this step and drive [`WaitFor::step`] again on resume
    Pending(Step),
}

enum Phase {
    Checking,
    Parked,
}

/// Resumable predicate wait over a [`Condition`].
///
/// Owns the wait/notify/re-acquire loop so a task body only drives it:
///
/// ```ignore
/// match wait.step()? {
///     WaitProgress::Ready => { /* predicate holds, lock held */ }
///     WaitProgress::Pending(step) => return step,
/// }
/// ```
///
/// Construct with [`Condition::wait_for`] while holding the lock. On
/// [`WaitProgress::Ready`] the predicate was true under the re-acquired
/// lock; releasing afterwards is the caller's job.
pub struct WaitFor<P> {
    cond: Condition,
    me: TaskId,
    pred: P,
    phase: Phase,
}

impl<P: FnMut() -> bool> WaitFor<P> {
    /// Drive the wait one step.
    pub fn step(&mut self) -> Result<WaitProgress, ProgrammingError> {
        loop {
            match self.phase {
                Phase::Checking => {
                    if self.cond.lock.holder() != Some(self.me) {
                        return Err(ProgrammingError::ConditionLockNotHeld);
                    }
                    if (self.pred)() {
                        return Ok(WaitProgress::Ready);
                    }
                    let event = self.cond.begin_wait(self.me)?;
                    self.phase = Phase::Parked;
                    return Ok(WaitProgress::Pending(Step::until(move || event.is_set())));
                }
                Phase::Parked => {
                    if !self.cond.lock.try_acquire(self.me) {
                        let lock = self.cond.lock.clone();
                        let me = self.me;
                        return Ok(WaitProgress::Pending(Step::until(move || {
                            lock.try_acquire(me)
                        })));
                    }
                    self.phase = Phase::Checking;
                }
            }
        }
    }
}
