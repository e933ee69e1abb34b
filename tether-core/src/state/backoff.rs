//! Reconnect backoff.
//!
//! Attempt `n` (1-indexed) waits `min(base * 2^(n-1), max)`. The initial
//! connection is not an attempt; a successful connection resets the count.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnect settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reconnect automatically after a failure or a lost connection.
    pub enabled: bool,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Reconnect attempts before giving up; `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay for reconnect attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        let millis = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }
}

/// Attempt counter for one session.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Reconnect attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Claim the next attempt and its delay, or `None` once the budget
    /// is exhausted (or reconnect is disabled).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if self.policy.max_attempts != 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64, attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            base_delay_ms: base,
            max_delay_ms: max,
            max_attempts: attempts,
        }
    }

    #[test]
    fn doubles_until_capped() {
        let p = policy(5_000, 60_000, 0);
        let delays: Vec<u64> = (1..=6).map(|n| p.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn budget_is_enforced() {
        let mut backoff = Backoff::new(policy(100, 1_000, 3));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(policy(100, 1_000, 2));
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn unlimited_attempts() {
        let mut backoff = Backoff::new(policy(1, 10, 0));
        for _ in 0..1_000 {
            assert!(backoff.next_delay().is_some());
        }
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let p = policy(u64::MAX / 2, u64::MAX, 0);
        assert_eq!(p.delay_for(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn disabled_never_retries() {
        let mut backoff = Backoff::new(ReconnectPolicy::disabled());
        assert!(backoff.next_delay().is_none());
    }
}
