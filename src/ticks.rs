//! Wrap-safe clock arithmetic
//!
//! The runtime clock is a monotonic millisecond counter that wraps at
//! [`TICKS_PERIOD`]. Raw tick values must never be compared with `<`/`>`;
//! every scheduling decision goes through [`ticks_diff`], which yields a
//! signed difference valid for spans within half the wrap period.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Wrap period of the tick counter, in milliseconds.
pub const TICKS_PERIOD: u32 = 1 << 30;

const TICKS_MASK: u32 = TICKS_PERIOD - 1;
const HALF_PERIOD: u32 = TICKS_PERIOD / 2;

/// A clock value in milliseconds, wrapping at [`TICKS_PERIOD`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Ticks(u32);

impl Ticks {
    /// Create a tick value from a raw counter, reducing it into the wrap
    /// period.
    pub fn new(raw: u32) -> Self {
        Ticks(raw & TICKS_MASK)
    }

    /// The raw counter value, always within `[0, TICKS_PERIOD)`.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Advance a tick value by `delta` milliseconds, wrapping at the period.
pub fn ticks_add(t: Ticks, delta: u32) -> Ticks {
    Ticks::new(t.0.wrapping_add(delta))
}

/// Signed difference `a - b` in milliseconds, valid for differences within
/// `±TICKS_PERIOD / 2`.
///
/// The half-period bias folds a wrapped subtraction back into a signed
/// range: `((a - b + P/2) mod P) - P/2`.
pub fn ticks_diff(a: Ticks, b: Ticks) -> i32 {
    ((a.0.wrapping_sub(b.0).wrapping_add(HALF_PERIOD) & TICKS_MASK) as i32) - HALF_PERIOD as i32
}

/// Source of the runtime's notion of time.
///
/// The scheduler only ever reads the clock and asks it to consume idle
/// periods; the latter lets a [`ManualClock`] run timing scenarios
/// deterministically without real sleeps.
pub trait Clock: Send + Sync {
    /// The current tick value.
    fn now(&self) -> Ticks;

    /// Consume an idle period up to `deadline`.
    ///
    /// Returns `true` if the clock advanced itself (the caller must not
    /// block), `false` if the caller should block for the corresponding
    /// wall time.
    fn consume_idle(&self, deadline: Ticks) -> bool {
        let _ = deadline;
        false
    }
}

/// Wall-clock backed [`Clock`], mapping `Instant` to millisecond ticks.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a system clock with its origin at construction time.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Ticks {
        Ticks::new(self.origin.elapsed().as_millis() as u32)
    }
}

/// Manually driven [`Clock`] for deterministic tests.
///
/// Idle periods are consumed by jumping the counter straight to the
/// deadline, so a scenario that "sleeps four seconds" finishes in
/// microseconds of wall time.
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Create a manual clock starting at `start`.
    pub fn new(start: Ticks) -> Self {
        Self {
            now: AtomicU32::new(start.raw()),
        }
    }

    /// Advance the clock by `delta` milliseconds.
    pub fn advance(&self, delta: u32) {
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(ticks_add(Ticks::new(raw), delta).raw())
            });
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Ticks::new(0))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ticks {
        Ticks::new(self.now.load(Ordering::Acquire))
    }

    fn consume_idle(&self, deadline: Ticks) -> bool {
        // Jump forward, never backward; concurrent advance() is respected.
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                if ticks_diff(deadline, Ticks::new(raw)) > 0 {
                    Some(deadline.raw())
                } else {
                    None
                }
            });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_round_trip() {
        // diff(add(t, d), t) == d for d in [0, P/2)
        let bases = [0u32, 1, 12345, TICKS_PERIOD - 1, TICKS_PERIOD / 2];
        let deltas = [0u32, 1, 999, HALF_PERIOD - 1];
        for &b in &bases {
            for &d in &deltas {
                let t = Ticks::new(b);
                assert_eq!(ticks_diff(ticks_add(t, d), t), d as i32, "b={b} d={d}");
            }
        }
    }

    #[test]
    fn test_diff_negative() {
        let t = Ticks::new(100);
        assert_eq!(ticks_diff(Ticks::new(95), t), -5);
        // Across the wrap boundary
        let late = Ticks::new(TICKS_PERIOD - 5);
        let early = Ticks::new(3);
        assert_eq!(ticks_diff(early, late), 8);
        assert_eq!(ticks_diff(late, early), -8);
    }

    #[test]
    fn test_add_wraps() {
        let t = Ticks::new(TICKS_PERIOD - 1);
        assert_eq!(ticks_add(t, 1).raw(), 0);
        assert_eq!(ticks_add(t, 2).raw(), 1);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(Ticks::new(10));
        assert_eq!(clock.now().raw(), 10);
        clock.advance(25);
        assert_eq!(clock.now().raw(), 35);
    }

    #[test]
    fn test_manual_clock_consume_idle() {
        let clock = ManualClock::new(Ticks::new(0));
        assert!(clock.consume_idle(Ticks::new(500)));
        assert_eq!(clock.now().raw(), 500);
        // Never moves backward
        assert!(clock.consume_idle(Ticks::new(100)));
        assert_eq!(clock.now().raw(), 500);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(ticks_diff(b, a) >= 0);
    }
}
