//! Process-wide request pacing.
//!
//! One instance is created per run and shared (via `Arc`) with every
//! component that issues HTTP requests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lower bound on requests per second (avoids a zero/negative interval)
const MIN_RPS: f64 = 0.1;

/// Enforces a minimum interval between consecutive requests.
///
/// `wait()` blocks until at least `1/rps` has elapsed since the previous
/// `wait()` returned. The lock is held while sleeping, so concurrent callers
/// are released one at a time.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rps: f64) -> Self {
        let rps = if rps.is_finite() { rps.max(MIN_RPS) } else { MIN_RPS };
        Self {
            min_interval: Duration::from_secs_f64(1.0 / rps),
            last: Mutex::new(None),
        }
    }

    /// Minimum spacing between requests
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the next request may be issued.
    pub fn wait(&self) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
