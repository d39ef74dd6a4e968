//! # Recovery Engine Configuration
//!
//! Serde-backed configuration tree for the recovery engine. Every section
//! carries `#[serde(default)]` so partial files and environment overrides
//! only need to name the values they change.
//!
//! Durations are expressed in milliseconds (`*_ms`) or seconds (`*_seconds`)
//! so that the same values can be supplied from TOML, YAML, JSON or
//! `RECOVERY__SECTION__KEY` environment variables.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::models::{ErrorCategory, RetryStrategy, ServiceKey};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Root configuration for the recovery engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub circuit_breakers: CircuitBreakersConfig,
    pub retry: RetryConfig,
    pub sweeps: SweepConfig,
    pub retention: RetentionConfig,
    pub health: HealthConfig,
    pub notifications: NotificationConfig,
    pub events: EventConfig,
}

impl RecoveryConfig {
    /// Validate every section, returning the first problem found
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breakers.validate()?;
        self.retry.validate()?;
        self.sweeps.validate()?;
        self.retention.validate()?;
        self.health.validate()?;
        self.events.validate()?;
        Ok(())
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakersConfig {
    /// When false, `execute_with_circuit_breaker` runs the operation unguarded
    pub enabled: bool,

    /// Whether `record_error` feeds failures into the breaker for the
    /// record's key. Callers that already wrap the same logical call with
    /// `execute_with_circuit_breaker` should use `execute_and_record`
    /// instead of turning this off globally.
    pub count_recorded_errors: bool,

    /// Defaults applied to any (service, operation) without its own entry
    pub default_config: CircuitBreakerComponentConfig,

    /// Overrides keyed by `"service:operation"` or by `"service"` alone
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count_recorded_errors: true,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

impl CircuitBreakersConfig {
    /// Resolve breaker configuration for a key: exact `service:operation`
    /// match first, then the service name, then the default
    pub fn config_for_key(&self, key: &ServiceKey) -> CircuitBreakerConfig {
        self.component_configs
            .get(&key.to_string())
            .or_else(|| self.component_configs.get(&key.service))
            .unwrap_or(&self.default_config)
            .to_resilience_config()
    }

    fn validate(&self) -> ConfigResult<()> {
        self.default_config
            .to_resilience_config()
            .validate()
            .map_err(|e| {
                ConfigurationError::invalid_value("circuit_breakers.default_config", "", e)
            })?;

        for (component, config) in &self.component_configs {
            config.to_resilience_config().validate().map_err(|e| {
                ConfigurationError::invalid_value(
                    format!("circuit_breakers.component_configs.{component}"),
                    "",
                    e,
                )
            })?;
        }

        Ok(())
    }
}

/// Serializable breaker parameters for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            timeout_ms: defaults.timeout.as_millis() as u64,
            half_open_max_calls: defaults.half_open_max_calls,
        }
    }
}

impl CircuitBreakerComponentConfig {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

/// Retry scheduling settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Strategy applied when neither the caller nor a category override
    /// supplies one
    pub default_strategy: RetryStrategy,

    /// Per-category strategies, e.g. slower backoff for `rate_limit`
    pub category_overrides: HashMap<ErrorCategory, RetryStrategy>,
}

impl RetryConfig {
    pub fn strategy_for(&self, category: ErrorCategory) -> &RetryStrategy {
        self.category_overrides
            .get(&category)
            .unwrap_or(&self.default_strategy)
    }

    fn validate(&self) -> ConfigResult<()> {
        self.default_strategy.validate().map_err(|e| {
            ConfigurationError::invalid_value("retry.default_strategy", "", e)
        })?;
        for (category, strategy) in &self.category_overrides {
            strategy.validate().map_err(|e| {
                ConfigurationError::invalid_value(
                    format!("retry.category_overrides.{category}"),
                    "",
                    e,
                )
            })?;
        }
        Ok(())
    }
}

/// Background sweep intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Short sweep: due retries, pending notifications, parked writes
    pub retry_interval_ms: u64,
    /// Long sweep: metrics recomputation and retention purge
    pub metrics_interval_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 5_000,
            metrics_interval_ms: 60_000,
        }
    }
}

impl SweepConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.retry_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "sweeps.retry_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }
        if self.metrics_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "sweeps.metrics_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Retention of error records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub error_record_ttl_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            error_record_ttl_seconds: 30 * 24 * 60 * 60,
        }
    }
}

impl RetentionConfig {
    pub fn error_record_ttl(&self) -> Duration {
        Duration::from_secs(self.error_record_ttl_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.error_record_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "retention.error_record_ttl_seconds",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Health status thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Unhealthy when more than this many breakers are open
    pub unhealthy_open_breakers: usize,
    /// Unhealthy when the error rate exceeds this fraction
    pub unhealthy_error_rate: f64,
    /// Degraded when more than this many breakers are open
    pub degraded_open_breakers: usize,
    /// Degraded when the error rate exceeds this fraction
    pub degraded_error_rate: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_open_breakers: 3,
            unhealthy_error_rate: 0.3,
            degraded_open_breakers: 0,
            degraded_error_rate: 0.1,
        }
    }
}

impl HealthConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (field, rate) in [
            ("health.unhealthy_error_rate", self.unhealthy_error_rate),
            ("health.degraded_error_rate", self.degraded_error_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    rate.to_string(),
                    "must be between 0.0 and 1.0",
                ));
            }
        }
        if self.degraded_error_rate > self.unhealthy_error_rate {
            return Err(ConfigurationError::validation_error(
                "health.degraded_error_rate must not exceed health.unhealthy_error_rate",
            ));
        }
        if self.degraded_open_breakers > self.unhealthy_open_breakers {
            return Err(ConfigurationError::validation_error(
                "health.degraded_open_breakers must not exceed health.unhealthy_open_breakers",
            ));
        }
        Ok(())
    }
}

/// Recipient lists for notifications and escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub critical_recipients: Vec<String>,
    pub high_recipients: Vec<String>,
    pub default_recipients: Vec<String>,
    pub support_recipients: Vec<String>,
    pub engineering_recipients: Vec<String>,
    pub management_recipients: Vec<String>,
    pub escalation_critical_recipients: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            critical_recipients: vec!["#incidents".to_string(), "oncall@example.com".to_string()],
            high_recipients: vec!["engineering@example.com".to_string()],
            default_recipients: vec!["dashboard".to_string()],
            support_recipients: vec!["support@example.com".to_string()],
            engineering_recipients: vec!["engineering@example.com".to_string()],
            management_recipients: vec!["management@example.com".to_string()],
            escalation_critical_recipients: vec![
                "oncall@example.com".to_string(),
                "cto@example.com".to_string(),
            ],
        }
    }
}

impl NotificationConfig {
    /// Audience for an escalation level; widens as the level grows
    pub fn escalation_recipients(&self, level: u32) -> Vec<String> {
        let mut recipients = self.support_recipients.clone();
        if level >= 2 {
            recipients.extend(self.engineering_recipients.iter().cloned());
        }
        if level >= 3 {
            recipients.extend(self.management_recipients.iter().cloned());
        }
        if level >= 4 {
            recipients.extend(self.escalation_critical_recipients.iter().cloned());
        }
        let mut seen = HashSet::new();
        recipients.retain(|r| seen.insert(r.clone()));
        recipients
    }
}

/// Domain event channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

impl EventConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
