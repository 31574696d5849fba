//! Retry configuration and backoff math.

use std::collections::BTreeSet;
use std::time::Duration;

use bulwark_errors::ErrorType;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetryError};

/// Largest fraction jitter may add to a computed delay.
pub const MAX_JITTER: f64 = 0.5;

/// Configuration for retrying one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for computed delays.
    pub max_delay_ms: u64,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Inflate computed delays by up to 50%.
    pub jitter: bool,
    /// Types retried when the error carries no explicit retryability.
    pub retryable_types: BTreeSet<ErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
            retryable_types: [
                ErrorType::Network,
                ErrorType::Timeout,
                ErrorType::Connectivity,
                ErrorType::Server,
                ErrorType::ServiceUnavailable,
                ErrorType::RateLimit,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Sets the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub const fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the retryable type set.
    #[must_use]
    pub fn with_retryable_types(mut self, types: impl IntoIterator<Item = ErrorType>) -> Self {
        self.retryable_types = types.into_iter().collect();
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound for computed delays.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Computed delay before retry `attempt` (1-based), without jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay(),
            self.max_delay(),
            self.backoff_factor,
        )
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(RetryError::InvalidConfig {
                reason: format!("backoff_factor must be >= 1.0, got {}", self.backoff_factor),
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(RetryError::InvalidConfig {
                reason: format!(
                    "base_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.base_delay_ms, self.max_delay_ms
                ),
            });
        }
        Ok(())
    }
}

/// Exponential backoff: `min(initial * multiplier^(attempt-1), max)`.
#[must_use]
pub fn calculate_backoff(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
) -> Duration {
    let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
    let delay_millis = (initial_delay.as_millis() as f64 * factor).min(u64::MAX as f64) as u64;
    Duration::from_millis(delay_millis).min(max_delay)
}

/// Inflates `delay` by a uniform factor in `[0, MAX_JITTER]`.
#[must_use]
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let factor = 1.0 + rng.gen_range(0.0..=MAX_JITTER);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use test_case::test_case;

    #[test]
    fn defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay(), Duration::from_secs(1));
        assert_eq!(config.max_delay(), Duration::from_secs(30));
        assert!(config.jitter);
        assert!(config.retryable_types.contains(&ErrorType::RateLimit));
        assert!(!config.retryable_types.contains(&ErrorType::Analysis));
        assert!(config.validate().is_ok());
    }

    #[test_case(1, 100 ; "first retry")]
    #[test_case(2, 200 ; "second retry")]
    #[test_case(3, 400 ; "third retry")]
    #[test_case(5, 1_000 ; "capped")]
    fn backoff_steps(attempt: u32, expected_ms: u64) {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));
        assert_eq!(
            config.delay_for_attempt(attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn rejects_shrinking_factor() {
        let config = RetryConfig::default().with_backoff_factor(0.5);
        assert!(matches!(
            config.validate(),
            Err(RetryError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_base_above_max() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_from_partial_toml_style_json() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_retries": 5, "retryable_types": ["network"]}"#)
                .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retryable_types.len(), 1);
        assert_eq!(config.base_delay_ms, 1_000);
    }

    proptest! {
        #[test]
        fn backoff_matches_formula(
            attempt in 1u32..12,
            base in 1u64..5_000,
            max in 1u64..120_000,
            factor in 1.0f64..4.0,
        ) {
            let delay = calculate_backoff(
                attempt,
                Duration::from_millis(base),
                Duration::from_millis(max),
                factor,
            );
            let expected = ((base as f64) * factor.powi(attempt as i32 - 1)) as u64;
            prop_assert_eq!(delay, Duration::from_millis(expected.min(max)));
        }

        #[test]
        fn jitter_stays_within_half(base in 1u64..100_000, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let delay = apply_jitter(Duration::from_millis(base), &mut rng);
            prop_assert!(delay >= Duration::from_millis(base));
            prop_assert!(delay.as_millis() as f64 <= base as f64 * 1.5);
        }

        #[test]
        fn backoff_is_monotonic(attempt in 1u32..20) {
            let config = RetryConfig::default();
            prop_assert!(config.delay_for_attempt(attempt + 1) >= config.delay_for_attempt(attempt));
        }
    }
}
