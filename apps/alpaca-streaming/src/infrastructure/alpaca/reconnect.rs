//! Reconnection Backoff
//!
//! Bounded exponential backoff for re-establishing a dropped stream. The
//! delay before attempt `n` (1-based) is `min(base * 2^(n-1), max)`, with
//! optional symmetric jitter that never pushes the delay past `max`.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamConfig;

/// Configuration for reconnection backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first attempt.
    pub base: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter as a fraction of the delay (e.g., 0.1 = ±10%). 0 disables it.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: 10,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Create a configuration without jitter.
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            jitter_factor: 0.0,
        }
    }

    /// Derive the backoff settings of a stream configuration.
    #[must_use]
    pub const fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            base: config.reconnect_delay_base,
            max: config.reconnect_delay_max,
            max_attempts: config.max_reconnect_attempts,
            jitter_factor: config.reconnect_jitter,
        }
    }
}

/// Attempt counter plus the delay formula.
///
/// # Example
///
/// ```rust
/// use alpaca_streaming::infrastructure::alpaca::reconnect::{BackoffConfig, BackoffPolicy};
/// use std::time::Duration;
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::default());
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt_count: u32,
}

impl BackoffPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before attempt `attempt` (1-based), without jitter.
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base_nanos = self.config.base.as_nanos();
        let scaled = 1u128
            .checked_shl(exponent)
            .map_or(u128::MAX, |factor| base_nanos.saturating_mul(factor));
        let capped = scaled.min(self.config.max.as_nanos());

        Duration::from_nanos(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Count an attempt and return its delay.
    ///
    /// Returns `None` once `max_attempts` attempts have been made.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.delay_for_attempt(self.attempt_count);
        Some(self.apply_jitter(delay))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base_secs = duration.as_secs_f64();
        let jitter_range = base_secs * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(adjusted).min(self.config.max)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn policy(base_ms: u64, max_ms: u64, max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            max_attempts,
        ))
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.base, Duration::from_secs(1));
        assert_eq!(config.max, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 10);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn seven_failures_double_then_cap() {
        let mut policy = policy(1_000, 60_000, 10);
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .take(7)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 60]);
    }

    #[test]
    fn max_attempts_exhausts() {
        let mut policy = policy(100, 1_000, 3);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut policy = policy(100, 10_000, 3);
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_max_attempts_is_unlimited() {
        let mut policy = policy(1, 5, 0);
        for _ in 0..1_000 {
            assert!(policy.next_delay().is_some());
        }
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_max() {
        let policy = policy(1_000, 60_000, 0);
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds_and_cap() {
        for _ in 0..100 {
            let mut policy = BackoffPolicy::new(BackoffConfig {
                jitter_factor: 0.1,
                ..BackoffConfig::new(Duration::from_secs(1), Duration::from_millis(1_050), 0)
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1_050, "delay {millis}ms is above the cap");
        }
    }

    proptest! {
        #[test]
        fn delay_matches_formula(
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            attempt in 1u32..=30,
        ) {
            let policy = policy(base_ms, max_ms, 30);
            let expected = base_ms
                .saturating_mul(1u64 << (attempt - 1))
                .min(max_ms);

            let delay = policy.delay_for_attempt(attempt);
            prop_assert_eq!(delay, Duration::from_millis(expected));
            prop_assert!(delay <= Duration::from_millis(max_ms));
        }
    }
}
