//! Per-username login throttling with exponential backoff.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;
use crate::error::{WalletError, WalletResult};

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    failures: u32,
    last_failure: Instant,
}

#[derive(Debug)]
pub struct LoginThrottle {
    settings: RateLimitSettings,
    windows: HashMap<String, FailureWindow>,
}

impl LoginThrottle {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            windows: HashMap::new(),
        }
    }

    /// Lockout after `failures` consecutive failures, if any.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        let exponent = failures.checked_sub(self.settings.threshold)?;
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let ms = self
            .settings
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.settings.max_delay_ms);
        Some(Duration::from_millis(ms))
    }

    /// Refuses the attempt while `username` is locked out. Does not touch the window.
    pub fn check(&mut self, username: &str, now: Instant) -> WalletResult<()> {
        let Some(window) = self.windows.get(username).copied() else {
            return Ok(());
        };
        let reset_after = Duration::from_secs(self.settings.reset_after_secs);
        if now.saturating_duration_since(window.last_failure) >= reset_after {
            self.windows.remove(username);
            return Ok(());
        }
        if let Some(delay) = self.delay_for(window.failures) {
            let until = window.last_failure + delay;
            if now < until {
                return Err(WalletError::RateLimited {
                    retry_after_ms: round_up_to_second(until - now),
                });
            }
        }
        Ok(())
    }

    /// Returns the consecutive failure count including this one.
    pub fn record_failure(&mut self, username: &str, now: Instant) -> u32 {
        let reset_after = Duration::from_secs(self.settings.reset_after_secs);
        let window = self
            .windows
            .entry(username.to_string())
            .or_insert(FailureWindow {
                failures: 0,
                last_failure: now,
            });
        if now.saturating_duration_since(window.last_failure) >= reset_after {
            window.failures = 0;
        }
        window.failures = window.failures.saturating_add(1);
        window.last_failure = now;
        window.failures
    }

    pub fn clear(&mut self, username: &str) {
        self.windows.remove(username);
    }

    pub fn failures(&self, username: &str) -> u32 {
        self.windows.get(username).map_or(0, |w| w.failures)
    }
}

// Whole seconds, so a caller that waits the advertised time is never refused again.
fn round_up_to_second(remaining: Duration) -> u64 {
    let ms = remaining.as_millis().min(u128::from(u64::MAX)) as u64;
    ms.div_ceil(1_000).max(1) * 1_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn throttle() -> LoginThrottle {
        LoginThrottle::new(RateLimitSettings::default())
    }

    fn fail(t: &mut LoginThrottle, user: &str, now: Instant, n: u32) {
        for _ in 0..n {
            t.record_failure(user, now);
        }
    }

    #[test]
    fn four_failures_do_not_lock() {
        let mut t = throttle();
        let now = Instant::now();
        fail(&mut t, "alice", now, 4);
        assert!(t.check("alice", now).is_ok());
    }

    #[test]
    fn sixth_attempt_is_limited_for_at_least_a_second() {
        let mut t = throttle();
        let now = Instant::now();
        fail(&mut t, "alice", now, 5);
        let err = t.check("alice", now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.retry_after_ms().unwrap() >= 1_000);
        assert!(t.check("alice", now + Duration::from_millis(1_000)).is_ok());
    }

    #[test]
    fn delay_doubles_and_caps() {
        let t = throttle();
        assert_eq!(t.delay_for(4), None);
        assert_eq!(t.delay_for(5), Some(Duration::from_secs(1)));
        assert_eq!(t.delay_for(6), Some(Duration::from_secs(2)));
        assert_eq!(t.delay_for(9), Some(Duration::from_secs(16)));
        assert_eq!(t.delay_for(10), Some(Duration::from_secs(30)));
        assert_eq!(t.delay_for(200), Some(Duration::from_secs(30)));
    }

    #[test]
    fn refused_attempts_do_not_extend_lockout() {
        let mut t = throttle();
        let start = Instant::now();
        fail(&mut t, "alice", start, 5);
        for ms in [0, 200, 400, 800] {
            assert!(t.check("alice", start + Duration::from_millis(ms)).is_err());
        }
        assert_eq!(t.failures("alice"), 5);
        assert!(t.check("alice", start + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn window_resets_after_quiet_period() {
        let mut t = throttle();
        let start = Instant::now();
        fail(&mut t, "alice", start, 7);
        let later = start + Duration::from_secs(15 * 60);
        assert!(t.check("alice", later).is_ok());
        assert_eq!(t.failures("alice"), 0);
        assert_eq!(t.record_failure("alice", later), 1);
    }

    #[test]
    fn users_are_independent_and_clear_resets() {
        let mut t = throttle();
        let now = Instant::now();
        fail(&mut t, "alice", now, 5);
        assert!(t.check("bob", now).is_ok());
        t.clear("alice");
        assert!(t.check("alice", now).is_ok());
        assert_eq!(t.failures("alice"), 0);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(round_up_to_second(Duration::from_millis(1)), 1_000);
        assert_eq!(round_up_to_second(Duration::from_millis(999)), 1_000);
        assert_eq!(round_up_to_second(Duration::from_millis(1_001)), 2_000);
        assert_eq!(round_up_to_second(Duration::ZERO), 1_000);
    }
}
