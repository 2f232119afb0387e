//! Handshake retry policy.
//!
//! Bounded exponential backoff:
//! - Initial delay: 500 ms
//! - Multiplier: 2x
//! - Maximum delay: 8 seconds
//! - Maximum attempts: 3

use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_BACKOFF_MS,
};

/// How often and how patiently the manager retries a failed handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total handshake attempts per connect, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder method to set the first retry delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Builder method to set the delay cap.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Builder method to set the backoff multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let delay_ms = self.initial_delay.as_secs_f64() * 1000.0 * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = if delay_ms.is_finite() {
            delay_ms.min(max_ms)
        } else {
            max_ms
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_delay_schedule_doubles_then_caps() {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(3));
        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for_retry(60), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new().max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn test_zero_delay() {
        let policy = RetryPolicy::new().initial_delay(Duration::ZERO);
        assert_eq!(policy.delay_for_retry(5), Duration::ZERO);
    }
}
