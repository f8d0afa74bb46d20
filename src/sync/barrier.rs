//! N-party rendezvous barrier

use crate::ProgrammingError;
use parking_lot::Mutex;
use std::sync::Arc;

type Action = Box<dyn FnMut() + Send>;

struct State {
    /// Arrivals in the current cycle, both waiting and triggered
    arrived: u32,
    /// Waiting arrivals of the released cycle that have not yet observed
    /// the release
    draining: u32,
    /// Completed cycles; an arrival token is the cycle it joined
    cycles: u64,
    /// Alternates every cycle: counting down to zero, then back up
    down: bool,
    action: Option<Action>,
}

/// An N-party rendezvous.
///
/// Participants either `arrive` (and then suspend, polling [`released`] with
/// the returned token until the cycle completes) or `trigger` (arrive
/// without waiting, so a task that is already being cancelled can leave the
/// rendezvous promptly instead of blocking shutdown). The Nth arrival runs
/// the optional action exactly once, flips the counting direction, and
/// releases every waiter of that cycle atomically with respect to
/// scheduling: no waiter can observe a half-released barrier, because
/// release is a single cycle-counter increment.
///
/// The barrier resets for the next cycle only after every waiter has
/// observed its release; an extra arrival before then fails fast with
/// [`ProgrammingError::BarrierOverflow`].
///
/// [`released`]: Barrier::released
#[derive(Clone)]
pub struct Barrier {
    parties: u32,
    state: Arc<Mutex<State>>,
}

impl Barrier {
    /// Create a barrier for `parties` participants.
    pub fn new(parties: u32) -> Self {
        Self::with_action_inner(parties, None)
    }

    /// Create a barrier whose action runs exactly once per completed cycle,
    /// on the Nth arrival.
    pub fn with_action(parties: u32, action: impl FnMut() + Send + 'static) -> Self {
        Self::with_action_inner(parties, Some(Box::new(action)))
    }

    fn with_action_inner(parties: u32, action: Option<Action>) -> Self {
        Self {
            parties,
            state: Arc::new(Mutex::new(State {
                arrived: 0,
                draining: 0,
                cycles: 0,
                down: true,
                action,
            })),
        }
    }

    /// Number of participants.
    pub fn parties(&self) -> u32 {
        self.parties
    }

    /// Completed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.state.lock().cycles
    }

    /// The rendezvous counter as the alternating count: down to zero in odd
    /// cycles, back up to `parties` in even ones.
    pub fn count(&self) -> u32 {
        let state = self.state.lock();
        if state.down {
            self.parties - state.arrived
        } else {
            state.arrived
        }
    }

    /// Arrive and intend to wait.
    ///
    /// Returns a token for [`Barrier::released`]; the caller should suspend
    /// and poll it until true, then stop polling. Fails with
    /// [`ProgrammingError::BarrierOverflow`] if the current cycle is already
    /// full.
    pub fn arrive(&self) -> Result<u64, ProgrammingError> {
        let mut state = self.state.lock();
        let token = state.cycles;
        self.register(&mut state, true)?;
        Ok(token)
    }

    /// Arrive without waiting.
    ///
    /// Counts toward the rendezvous like [`Barrier::arrive`] but the caller
    /// never polls for release.
    pub fn trigger(&self) -> Result<(), ProgrammingError> {
        let mut state = self.state.lock();
        self.register(&mut state, false)
    }

    /// Whether the cycle `token` was taken from has completed. The first
    /// poll that returns true also counts the caller as drained; callers
    /// must stop polling after that.
    pub fn released(&self, token: u64) -> bool {
        let mut state = self.state.lock();
        if state.cycles <= token {
            return false;
        }
        if state.draining > 0 {
            state.draining -= 1;
            if state.draining == 0 {
                state.arrived = 0;
            }
        }
        true
    }

    fn register(&self, state: &mut State, waiting: bool) -> Result<(), ProgrammingError> {
        if state.arrived >= self.parties {
            return Err(ProgrammingError::BarrierOverflow);
        }
        state.arrived += 1;
        state.draining += u32::from(waiting);
        if state.arrived == self.parties {
            if let Some(action) = state.action.as_mut() {
                action();
            }
            state.cycles += 1;
            state.down = !state.down;
            if state.draining == 0 {
                // Trigger-only cycle: nothing to drain, reset now
                state.arrived = 0;
            }
        }
        Ok(())
    }
}
