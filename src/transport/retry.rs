//! Retry schedule for outbound calls.
//!
//! Transient failures back off exponentially: the delay doubles per retry,
//! is capped at a ceiling, and then gets symmetric jitter so concurrent
//! callers do not retry in lockstep. Rate-limit (429) responses are handled
//! outside this schedule with a server-directed delay, but share the same
//! attempt ceiling.

use std::time::Duration;

use rand::Rng;

/// Retry configuration for the transport and completion backends.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 4.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 500ms.
    pub initial_backoff: Duration,

    /// Ceiling applied before jitter. Default: 30s.
    pub max_backoff: Duration,

    /// Symmetric jitter fraction applied after capping (0.25 = ±25%).
    pub jitter: f64,

    /// Delay used for a 429 response that carries no usable
    /// `Retry-After` or reset header. Default: 30s.
    pub rate_limit_fallback: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: 0.25,
            rate_limit_fallback: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt ceiling (including the first attempt).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay before the first retry.
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_backoff(mut self, ceiling: Duration) -> Self {
        self.max_backoff = ceiling;
        self
    }

    /// Set the jitter fraction, clamped to [0, 1].
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the fallback delay for headerless 429 responses.
    pub fn with_rate_limit_fallback(mut self, delay: Duration) -> Self {
        self.rate_limit_fallback = delay;
        self
    }

    /// Delay before retry number `retry` (0-based): initial backoff doubled
    /// per retry, capped, then jittered.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        let raw = self.initial_backoff.saturating_mul(factor);
        let capped = raw.min(self.max_backoff);
        apply_jitter(capped, self.jitter)
    }
}

/// Scale a delay by a random factor in [1 - jitter, 1 + jitter].
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range(1.0 - jitter..=1.0 + jitter);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_builder_pattern() {
        let policy = RetryPolicy::new()
            .with_max_attempts(6)
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(5))
            .with_jitter(0.1);

        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
        assert_eq!(policy.jitter, 0.1);
    }

    #[test]
    fn test_first_delay_within_jitter_band() {
        let base = Duration::from_millis(1000);
        let policy = RetryPolicy::new().with_initial_backoff(base);

        for _ in 0..50 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_millis(750), "delay {delay:?}");
            assert!(delay <= Duration::from_millis(1250), "delay {delay:?}");
        }
    }

    #[test]
    fn test_second_delay_doubles_then_jitters() {
        // After one retry round the delay lies in [1.5B, 2.5B].
        let base = Duration::from_millis(1000);
        let policy = RetryPolicy::new().with_initial_backoff(base);

        for _ in 0..50 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(1500), "delay {delay:?}");
            assert!(delay <= Duration::from_millis(2500), "delay {delay:?}");
        }
    }

    #[test]
    fn test_delay_never_exceeds_jittered_ceiling() {
        let policy = RetryPolicy::new()
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(2));

        for retry in 0..20 {
            let delay = policy.backoff_delay(retry);
            // Cap applies before jitter, so the bound is ceiling * 1.25.
            assert!(delay <= Duration::from_millis(2500), "delay {delay:?}");
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new()
            .with_initial_backoff(Duration::from_millis(100))
            .with_jitter(0.0);

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }
}
