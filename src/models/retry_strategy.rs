//! # Retry Strategy
//!
//! Configuration value describing how retry delays grow. Not a stored entity.

use super::classification::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    #[default]
    Exponential,
    Linear,
    Fixed,
    Custom,
}

/// User-supplied delay function for `custom` strategies, called with the
/// current retry count
#[derive(Clone)]
pub struct CustomDelay(Arc<dyn Fn(u32) -> Duration + Send + Sync>);

impl CustomDelay {
    pub fn new<F>(delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self(Arc::new(delay))
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        (self.0)(retry_count)
    }
}

impl fmt::Debug for CustomDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomDelay(<fn>)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryStrategy {
    #[serde(rename = "type")]
    pub strategy_type: RetryStrategyType,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub max_retries: u32,
    pub retryable_categories: HashSet<ErrorCategory>,
    #[serde(skip)]
    pub custom_delay: Option<CustomDelay>,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            strategy_type: RetryStrategyType::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
            max_retries: 5,
            retryable_categories: [
                ErrorCategory::Network,
                ErrorCategory::Timeout,
                ErrorCategory::RateLimit,
                ErrorCategory::ServerError,
                ErrorCategory::System,
                ErrorCategory::Integration,
            ]
            .into_iter()
            .collect(),
            custom_delay: None,
        }
    }
}

impl RetryStrategy {
    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            strategy_type: RetryStrategyType::Exponential,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            multiplier,
            ..Default::default()
        }
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy_type: RetryStrategyType::Linear,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy_type: RetryStrategyType::Fixed,
            base_delay_ms: delay.as_millis() as u64,
            max_delay_ms: delay.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn custom(delay: CustomDelay, max_delay: Duration) -> Self {
        Self {
            strategy_type: RetryStrategyType::Custom,
            max_delay_ms: max_delay.as_millis() as u64,
            custom_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retryable_categories = categories.into_iter().collect();
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn covers(&self, category: ErrorCategory) -> bool {
        self.retryable_categories.contains(&category)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if self.strategy_type == RetryStrategyType::Exponential && self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !self.multiplier.is_finite() {
            return Err("multiplier must be finite".to_string());
        }
        Ok(())
    }
}
