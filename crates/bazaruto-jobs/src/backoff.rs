//! Quadratic retry backoff with bounded jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default backoff base.
pub const DEFAULT_BASE: Duration = Duration::from_secs(1);

/// Default upper bound for a single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff policy for rescheduling failed attempts.
///
/// `delay(n) = min(base * n², max_delay) + jitter`, where the jitter is
/// non-negative and grows with the attempt number but never exceeds
/// `jitter_factor` of the deterministic part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay.
    pub base: Duration,

    /// Cap for the deterministic part of the delay.
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the given base and default cap and jitter.
    pub fn quadratic(base: Duration) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter factor.
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Deterministic part of the delay for the given attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.base_delay_with(self.base, attempt)
    }

    /// Full delay for the given attempt, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(self.base, attempt)
    }

    /// Like [`delay`](Self::delay) but with a per-job-type base.
    pub fn delay_with(&self, base: Duration, attempt: u32) -> Duration {
        let delay = self.base_delay_with(base, attempt);
        delay + self.jitter(delay, attempt)
    }

    fn base_delay_with(&self, base: Duration, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let squared = attempt.saturating_mul(attempt);
        base.checked_mul(squared)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jitter(&self, delay: Duration, attempt: u32) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return Duration::ZERO;
        }
        let scale = f64::from(attempt) / f64::from(attempt.saturating_add(1));
        let bound = delay.as_secs_f64() * self.jitter_factor.min(1.0) * scale;
        if bound <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quadratic_growth() {
        let policy = BackoffPolicy::quadratic(Duration::from_millis(100)).without_jitter();

        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(900));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = BackoffPolicy::quadratic(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(600))
            .without_jitter();

        assert_eq!(policy.delay(10), Duration::from_secs(600));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_per_job_base() {
        let policy = BackoffPolicy::default().without_jitter();
        assert_eq!(
            policy.delay_with(Duration::from_millis(250), 2),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_jitter_factor_clamped() {
        let policy = BackoffPolicy::default().with_jitter(4.0);
        assert!((policy.jitter_factor - 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn jitter_is_bounded_and_non_negative(base_ms in 1u64..10_000, attempt in 1u32..50, factor in 0.0f64..1.0) {
            let policy = BackoffPolicy::quadratic(Duration::from_millis(base_ms)).with_jitter(factor);
            let floor = policy.base_delay(attempt);
            let delay = policy.delay(attempt);
            prop_assert!(delay >= floor);
            prop_assert!(delay.as_secs_f64() <= floor.as_secs_f64() * (1.0 + factor) + 1e-6);
        }
    }
}
