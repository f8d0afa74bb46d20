//! Named tasks, cancellation groups, and rendezvous-confirmed shutdown
//!
//! Cancellation is cooperative and asynchronous: it only takes effect at
//! the target's next resumption point. Callers that need "the cancelled
//! tasks have definitely released their resources" get it deterministically
//! through a rendezvous sized at (targets + 1): each target's exit hook
//! triggers the barrier as it reaches its terminal state, and the caller
//! arrives as the extra party and suspends until the cycle completes.

use crate::arena::TaskRef;
use crate::scheduler::{Scheduler, SpawnOptions};
use crate::sync::Barrier;
use crate::task::{CancelKind, Step, TaskHandle, Wake};
use crate::{ProgrammingError, RtResult};
use std::any::Any;

/// Confirmation handle for a group cancellation.
///
/// The caller arrives with [`Rendezvous::arrive`] and then suspends,
/// polling [`Rendezvous::complete`] with the returned token until every
/// cancelled task has reached its terminal state.
#[derive(Clone)]
pub struct Rendezvous {
    barrier: Barrier,
}

impl Rendezvous {
    /// Number of cancelled tasks being confirmed.
    pub fn targets(&self) -> u32 {
        self.barrier.parties() - 1
    }

    /// Arrive as the confirming party. Returns the token to poll with.
    pub fn arrive(&self) -> Result<u64, ProgrammingError> {
        self.barrier.arrive()
    }

    /// Whether every target has terminated. The first poll returning true
    /// consumes the confirmation; stop polling after that.
    pub fn complete(&self, token: u64) -> bool {
        self.barrier.released(token)
    }
}

impl Scheduler {
    /// Spawn a task under a name, unique among live tasks.
    pub fn spawn_named<T, F>(&mut self, name: &str, body: F) -> RtResult<TaskHandle<T>>
    where
        T: Any + Send,
        F: FnMut(Wake) -> Step + Send + 'static,
    {
        self.spawn_with(SpawnOptions::new().named(name), body)
    }

    /// Look up a live task by name.
    pub fn lookup(&self, name: &str) -> Option<TaskRef> {
        self.names.get(name).copied()
    }

    /// Whether a task with this name is live and unfinished.
    ///
    /// Reports false once a task has self-completed, with or without
    /// explicit cancellation.
    pub fn is_running(&self, name: &str) -> bool {
        match self.names.get(name) {
            Some(&r) => matches!(self.arena.get(r), Some(e) if !e.task.is_finished()),
            None => false,
        }
    }

    /// Request cancellation of a live named task. Returns false if no such
    /// task is live (idempotent, never an error).
    pub fn cancel_named(&mut self, name: &str) -> bool {
        match self.names.get(name).copied() {
            Some(r) => self.cancel_task(r, CancelKind::Stop),
            None => false,
        }
    }

    /// Request cancellation of every live task in a group. Returns how many
    /// tasks were newly marked.
    pub fn cancel_group(&mut self, group: &str) -> usize {
        self.group_members(group)
            .into_iter()
            .filter(|&r| self.cancel_task(r, CancelKind::Stop))
            .count()
    }

    /// Cancel every live task in a group and return a rendezvous confirming
    /// their termination.
    ///
    /// Each target acknowledges by reaching its exit hook, whatever its
    /// terminal state turns out to be; a target that completes normally
    /// before the stop signal lands still counts. With no live targets the
    /// returned rendezvous completes on the caller's first poll.
    pub fn cancel_group_confirmed(&mut self, group: &str) -> Rendezvous {
        let targets = self.group_members(group);
        let barrier = Barrier::new(targets.len() as u32 + 1);
        for r in &targets {
            let barrier = barrier.clone();
            if let Some(entry) = self.arena.get_mut(*r) {
                entry.exit_hooks.push(Box::new(move || {
                    // Sized exactly for the targets; cannot overflow
                    let _ = barrier.trigger();
                }));
            }
        }
        for r in targets {
            self.cancel_task(r, CancelKind::Stop);
        }
        Rendezvous { barrier }
    }
}
