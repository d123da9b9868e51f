use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// The authoritative monotonic clock every scheduling and judgment decision is
/// measured against. Readings are seconds since an arbitrary epoch.
///
/// `None` means the clock has not been brought up yet (an audio device that is
/// still opening, for instance).
pub trait AudioClock {
    fn now(&self) -> Option<f64>;
}

/// Wall-monotonic clock anchored at construction.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for MonotonicClock {
    #[inline(always)]
    fn now(&self) -> Option<f64> {
        Some(self.origin.elapsed().as_secs_f64())
    }
}

/// Hand-driven clock. Clones share the same reading, so a test can keep one
/// handle while the engine owns another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    reading: Rc<Cell<Option<f64>>>,
}

impl ManualClock {
    pub fn starting_at(t: f64) -> Self {
        Self { reading: Rc::new(Cell::new(Some(t))) }
    }

    /// A clock that has not started yet.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, t: f64) {
        self.reading.set(Some(t));
    }

    pub fn advance(&self, dt: f64) {
        self.reading.set(Some(self.reading.get().unwrap_or(0.0) + dt));
    }
}

impl AudioClock for ManualClock {
    #[inline(always)]
    fn now(&self) -> Option<f64> {
        self.reading.get()
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioClock, ManualClock, MonotonicClock};

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::starting_at(1.0);
        let other = clock.clone();
        other.advance(0.5);
        assert_eq!(clock.now(), Some(1.5));
        assert_eq!(ManualClock::unavailable().now(), None);
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let a = clock.now().unwrap_or_default();
        let b = clock.now().unwrap_or_default();
        assert!(b >= a);
    }
}
