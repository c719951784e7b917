//! Deferred-flush scheduling: clocks and the trip-once timer.
//!
//! The store never touches real timers directly. It asks an injected
//! [`Clock`] for the current tick and arms a [`TripTimer`], a
//! trip-once-per-window primitive: arming only takes effect when nothing is
//! pending, and repeated arming never resets the deadline. That bounds
//! worst-case flush latency to one fixed delay instead of letting a stream of
//! submissions push the flush out indefinitely (this is not a resettable
//! debounce).
//!
//! Tests drive a [`VirtualClock`]; production code uses [`SystemClock`],
//! which counts milliseconds since construction.

use std::cell::Cell;
use std::rc::Rc;

use web_time::Instant;

/// Store time unit. [`SystemClock`] maps one tick to one millisecond.
pub type Ticks = u64;

/// A monotonic tick source.
pub trait Clock {
    /// Current tick.
    fn now(&self) -> Ticks;
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<Ticks>,
}

impl VirtualClock {
    /// Create a clock at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle at tick zero.
    #[must_use]
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::new())
    }

    /// Advance the clock by `delta` ticks.
    pub fn advance(&self, delta: Ticks) {
        self.now.set(self.now.get() + delta);
    }

    /// Jump to an absolute tick. Never moves backwards.
    pub fn set(&self, now: Ticks) {
        if now > self.now.get() {
            self.now.set(now);
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Ticks {
        self.now.get()
    }
}

/// Wall clock: milliseconds elapsed since construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current instant.
    #[must_use]
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
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Trip-once-per-window deadline.
#[derive(Debug, Default)]
pub struct TripTimer {
    deadline: Cell<Option<Ticks>>,
}

impl TripTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the deadline `now + delay` if nothing is pending. Returns whether
    /// this call armed the timer; an already armed timer is left untouched.
    pub fn arm(&self, now: Ticks, delay: Ticks) -> bool {
        if self.deadline.get().is_some() {
            return false;
        }
        self.deadline.set(Some(now + delay));
        true
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.get().is_some()
    }

    /// The pending deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Ticks> {
        self.deadline.get()
    }

    /// Whether the armed deadline has passed.
    #[must_use]
    pub fn due(&self, now: Ticks) -> bool {
        self.deadline.get().is_some_and(|deadline| now >= deadline)
    }

    /// Disarm.
    pub fn clear(&self) {
        self.deadline.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_does_not_reset_a_pending_deadline() {
        let timer = TripTimer::new();
        assert!(timer.arm(0, 30));
        assert!(!timer.arm(20, 30), "re-arming must not extend the window");
        assert_eq!(timer.deadline(), Some(30));
        assert!(!timer.due(29));
        assert!(timer.due(30));
    }

    #[test]
    fn clear_allows_rearming() {
        let timer = TripTimer::new();
        timer.arm(0, 10);
        timer.clear();
        assert!(!timer.is_armed());
        assert!(timer.arm(50, 10));
        assert_eq!(timer.deadline(), Some(60));
    }

    #[test]
    fn virtual_clock_is_monotonic() {
        let clock = VirtualClock::new();
        clock.advance(5);
        clock.set(3);
        assert_eq!(clock.now(), 5);
        clock.set(9);
        assert_eq!(clock.now(), 9);
    }
}
