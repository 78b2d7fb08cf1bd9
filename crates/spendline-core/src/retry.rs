//! Backoff schedules for request retries, availability probes and polling

use std::time::Duration;

/// Geometric backoff with a ceiling.
///
/// Each call to [`Backoff::next_delay`] returns the current delay and grows
/// it by `multiplier`, never exceeding `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    multiplier: f64,
    cap: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        let initial = initial.min(cap);
        Self {
            current: initial,
            multiplier: multiplier.max(1.0),
            cap,
        }
    }

    /// Doubling backoff (the schedule used for transient transport errors)
    pub fn exponential(initial: Duration, cap: Duration) -> Self {
        Self::new(initial, 2.0, cap)
    }

    /// Delay to sleep now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.cap);
        delay
    }
}
