//! Per-driver inbound frame rate limiter
//!
//! Sliding-window, in-memory, resets on process restart. GPS floods from a
//! misbehaving client are answered with RATE_LIMITED instead of being
//! queued; pong and completion handling are never limited.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// In-memory sliding-window rate limiter keyed by driver id.
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Check `driver_id` against the limit. Returns `true` if the frame is
    /// allowed and records it; `false` if the driver is over the limit.
    pub fn check_and_record(&self, driver_id: &str) -> bool {
        let mut attempts = self.attempts.lock();
        let now = Instant::now();

        let entry = attempts.entry(driver_id.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);

        if entry.len() >= self.max_attempts {
            return false;
        }
        entry.push(now);
        true
    }

    /// Drop expired windows (call periodically to bound memory).
    pub fn cleanup(&self) {
        let mut attempts = self.attempts.lock();
        let now = Instant::now();
        attempts.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < self.window);
            !entries.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check_and_record("drv-1"));
        assert!(limiter.check_and_record("drv-1"));
        assert!(limiter.check_and_record("drv-1"));
        assert!(!limiter.check_and_record("drv-1"));
    }

    #[test]
    fn test_drivers_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_record("drv-1"));
        assert!(!limiter.check_and_record("drv-1"));
        assert!(limiter.check_and_record("drv-2"));
    }

    #[test]
    fn test_window_expiry_frees_slots() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.check_and_record("drv-1"));
        assert!(!limiter.check_and_record("drv-1"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check_and_record("drv-1"));
    }

    #[test]
    fn test_cleanup_drops_idle_drivers() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check_and_record("drv-1");
        std::thread::sleep(Duration::from_millis(15));
        limiter.cleanup();
        assert!(limiter.attempts.lock().is_empty());
    }
}
