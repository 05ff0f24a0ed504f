//! Rapid-failure circuit breaker
//!
//! Trips when too many fix attempts fail inside a short window, independent
//! of the cycle-based stalemate detector.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct FailureBreaker {
    window: Duration,
    max_failures: u32,
    failures: VecDeque<Instant>,
}

impl FailureBreaker {
    pub fn new(window: Duration, max_failures: u32) -> Self {
        Self {
            window,
            max_failures,
            failures: VecDeque::new(),
        }
    }

    /// Record a failure at `now`; true when the breaker trips
    pub fn record_failure_at(&mut self, now: Instant) -> bool {
        self.failures.push_back(now);
        while let Some(first) = self.failures.front() {
            if now.duration_since(*first) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        debug!(recent = self.failures.len(), max = self.max_failures, "FailureBreaker::record_failure_at: called");
        let tripped = self.max_failures > 0 && self.failures.len() as u32 >= self.max_failures;
        if tripped {
            warn!(failures = self.failures.len(), window = ?self.window, "Too many failures in a short window");
        }
        tripped
    }

    pub fn record_failure(&mut self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn reset(&mut self) {
        self.failures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_inside_window() {
        let mut b = FailureBreaker::new(Duration::from_secs(60), 3);
        let t0 = Instant::now();
        assert!(!b.record_failure_at(t0));
        assert!(!b.record_failure_at(t0 + Duration::from_secs(1)));
        assert!(b.record_failure_at(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_old_failures_age_out() {
        let mut b = FailureBreaker::new(Duration::from_secs(10), 2);
        let t0 = Instant::now();
        assert!(!b.record_failure_at(t0));
        assert!(!b.record_failure_at(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_reset_and_disabled() {
        let mut b = FailureBreaker::new(Duration::from_secs(10), 2);
        b.record_failure();
        b.reset();
        assert!(!b.record_failure());

        let mut off = FailureBreaker::new(Duration::from_secs(10), 0);
        assert!(!off.record_failure());
        assert!(!off.record_failure());
    }
}
