//! # Backoff Calculator
//!
//! Retry delay calculation for every [`RetryStrategyType`].
//!
//! ## Key Features
//!
//! - **Exponential / Linear / Fixed / Custom** growth curves
//! - **Server-Requested Backoff**: honour a `retry_after_ms` hint attached to
//!   the error context (e.g. from a `Retry-After` header)
//! - **Maximum Delay Caps**: every curve is capped at the strategy's max delay
//! - **Jitter Support**: the capped delay is scaled by a uniform factor in
//!   `[0.5, 1.0)` to avoid synchronized retry storms

use crate::models::{ErrorContext, RetryStrategy, RetryStrategyType};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Context metadata key carrying a server-requested delay in milliseconds
pub const RETRY_AFTER_METADATA_KEY: &str = "retry_after_ms";

/// Lower bound (inclusive) of the jitter factor
pub const JITTER_MIN: f64 = 0.5;
/// Upper bound (exclusive) of the jitter factor
pub const JITTER_MAX: f64 = 1.0;

/// Result of a backoff calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffResult {
    /// Delay to wait before the retry becomes due
    pub delay: Duration,
    /// Type of backoff applied
    pub backoff_type: BackoffType,
    /// Factor applied to the capped delay, when jitter was used
    pub jitter_factor: Option<f64>,
    /// When the retry becomes due
    pub next_retry_at: DateTime<Utc>,
}

/// Type of backoff calculation applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Server requested via a retry-after hint
    ServerRequested,
    /// Computed from the retry strategy
    Strategy(RetryStrategyType),
}

/// Stateless backoff calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Capped delay for a retry count, before jitter
    pub fn base_delay(strategy: &RetryStrategy, retry_count: u32) -> Duration {
        let max_ms = strategy.max_delay_ms;
        let raw_ms = match strategy.strategy_type {
            RetryStrategyType::Exponential => {
                let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
                let delay = strategy.base_delay_ms as f64 * strategy.multiplier.powi(exponent);
                if delay.is_finite() && delay < max_ms as f64 {
                    delay.max(0.0).round() as u64
                } else {
                    max_ms
                }
            }
            RetryStrategyType::Linear => strategy
                .base_delay_ms
                .saturating_mul(u64::from(retry_count) + 1),
            RetryStrategyType::Fixed => strategy.base_delay_ms,
            RetryStrategyType::Custom => match &strategy.custom_delay {
                Some(custom) => {
                    u64::try_from(custom.delay_for(retry_count).as_millis()).unwrap_or(u64::MAX)
                }
                None => strategy.base_delay_ms,
            },
        };

        Duration::from_millis(raw_ms.min(max_ms))
    }

    /// Draw a jitter factor in `[0.5, 1.0)`
    pub fn jitter_factor() -> f64 {
        rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX)
    }

    /// Scale a delay by a jitter factor
    pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
        delay.mul_f64(factor.clamp(0.0, 1.0))
    }

    /// Full calculation for the next retry of a record
    pub fn calculate(strategy: &RetryStrategy, retry_count: u32) -> BackoffResult {
        let capped = Self::base_delay(strategy, retry_count);
        let (delay, jitter_factor) = if strategy.jitter {
            let factor = Self::jitter_factor();
            (Self::apply_jitter(capped, factor), Some(factor))
        } else {
            (capped, None)
        };

        BackoffResult {
            delay,
            backoff_type: BackoffType::Strategy(strategy.strategy_type),
            jitter_factor,
            next_retry_at: Self::due_at(delay),
        }
    }

    /// Like [`calculate`](Self::calculate), but a server-requested delay in
    /// the context takes precedence (still capped at the max delay)
    pub fn calculate_for_context(
        strategy: &RetryStrategy,
        retry_count: u32,
        context: &ErrorContext,
    ) -> BackoffResult {
        match Self::extract_retry_after(context) {
            Some(requested) => {
                let delay = requested.min(strategy.max_delay());
                BackoffResult {
                    delay,
                    backoff_type: BackoffType::ServerRequested,
                    jitter_factor: None,
                    next_retry_at: Self::due_at(delay),
                }
            }
            None => Self::calculate(strategy, retry_count),
        }
    }

    fn extract_retry_after(context: &ErrorContext) -> Option<Duration> {
        context
            .metadata
            .get(RETRY_AFTER_METADATA_KEY)
            .and_then(|value| value.as_u64())
            .map(Duration::from_millis)
    }

    fn due_at(delay: Duration) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(52))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomDelay;
    use proptest::prelude::*;

    fn exponential_without_jitter() -> RetryStrategy {
        RetryStrategy::exponential(Duration::from_millis(1000), 2.0, Duration::from_secs(30))
            .with_jitter(false)
    }

    #[test]
    fn test_exponential_delays() {
        let strategy = exponential_without_jitter();
        let delays: Vec<u128> = (0..3)
            .map(|n| BackoffCalculator::base_delay(&strategy, n).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);

        // 1000 * 2^5 = 32000 is capped
        assert_eq!(
            BackoffCalculator::base_delay(&strategy, 5),
            Duration::from_secs(30)
        );
        assert_eq!(
            BackoffCalculator::base_delay(&strategy, u32::MAX),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_fractional_multiplier_rounds_to_nearest_ms() {
        let strategy =
            RetryStrategy::exponential(Duration::from_millis(1000), 1.2, Duration::from_secs(30))
                .with_jitter(false);
        let delays: Vec<u128> = (0..4)
            .map(|n| BackoffCalculator::base_delay(&strategy, n).as_millis())
            .collect();
        // 1000 * 1.2^3 is 1727.9999... in floating point
        assert_eq!(delays, vec![1000, 1200, 1440, 1728]);
    }

    #[test]
    fn test_linear_and_fixed_delays() {
        let linear = RetryStrategy::linear(Duration::from_millis(500), Duration::from_secs(2));
        assert_eq!(BackoffCalculator::base_delay(&linear, 0).as_millis(), 500);
        assert_eq!(BackoffCalculator::base_delay(&linear, 2).as_millis(), 1500);
        assert_eq!(BackoffCalculator::base_delay(&linear, 10).as_millis(), 2000);

        let fixed = RetryStrategy::fixed(Duration::from_millis(750));
        assert_eq!(BackoffCalculator::base_delay(&fixed, 0).as_millis(), 750);
        assert_eq!(BackoffCalculator::base_delay(&fixed, 9).as_millis(), 750);
    }

    #[test]
    fn test_custom_delay_is_capped() {
        let strategy = RetryStrategy::custom(
            CustomDelay::new(|n| Duration::from_secs(u64::from(n) * 10)),
            Duration::from_secs(25),
        );
        assert_eq!(BackoffCalculator::base_delay(&strategy, 1), Duration::from_secs(10));
        assert_eq!(BackoffCalculator::base_delay(&strategy, 3), Duration::from_secs(25));
    }

    #[test]
    fn test_no_jitter_reports_no_factor() {
        let result = BackoffCalculator::calculate(&exponential_without_jitter(), 1);
        assert_eq!(result.delay, Duration::from_millis(2000));
        assert_eq!(result.jitter_factor, None);
        assert_eq!(
            result.backoff_type,
            BackoffType::Strategy(RetryStrategyType::Exponential)
        );
    }

    #[test]
    fn test_server_requested_backoff() {
        let strategy = exponential_without_jitter();
        let context = ErrorContext::new("svc", "op")
            .with_metadata(RETRY_AFTER_METADATA_KEY, serde_json::json!(12_000));
        let result = BackoffCalculator::calculate_for_context(&strategy, 0, &context);
        assert_eq!(result.backoff_type, BackoffType::ServerRequested);
        assert_eq!(result.delay, Duration::from_secs(12));

        let greedy = ErrorContext::new("svc", "op")
            .with_metadata(RETRY_AFTER_METADATA_KEY, serde_json::json!(600_000));
        let result = BackoffCalculator::calculate_for_context(&strategy, 0, &greedy);
        assert_eq!(result.delay, Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn prop_jitter_factor_in_range(_seed in 0u32..1000) {
            let factor = BackoffCalculator::jitter_factor();
            prop_assert!((JITTER_MIN..JITTER_MAX).contains(&factor));
        }

        #[test]
        fn prop_jittered_delay_within_bounds(
            base_ms in 1u64..10_000,
            multiplier in 1.0f64..4.0,
            retry_count in 0u32..20,
        ) {
            let strategy = RetryStrategy::exponential(
                Duration::from_millis(base_ms),
                multiplier,
                Duration::from_millis(60_000),
            );
            let capped = BackoffCalculator::base_delay(&strategy, retry_count);
            let result = BackoffCalculator::calculate(&strategy, retry_count);

            prop_assert!(capped <= strategy.max_delay());
            prop_assert!(result.delay <= capped);
            prop_assert!(result.delay >= capped.mul_f64(JITTER_MIN).saturating_sub(Duration::from_millis(1)));
        }

        #[test]
        fn prop_exponential_matches_closed_form(
            base_ms in 1u64..5_000,
            retry_count in 0u32..10,
        ) {
            let strategy = RetryStrategy::exponential(
                Duration::from_millis(base_ms),
                2.0,
                Duration::from_millis(1_000_000),
            ).with_jitter(false);
            let expected = (base_ms * 2u64.pow(retry_count)).min(1_000_000);
            prop_assert_eq!(
                BackoffCalculator::base_delay(&strategy, retry_count).as_millis() as u64,
                expected
            );
        }
    }
}
