use super::ServiceKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a fallback produces its substitute result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackType {
    Cache,
    DefaultValue,
    AlternativeService,
    QueueForLater,
    GracefulDegradation,
}

impl FallbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackType::Cache => "cache",
            FallbackType::DefaultValue => "default_value",
            FallbackType::AlternativeService => "alternative_service",
            FallbackType::QueueForLater => "queue_for_later",
            FallbackType::GracefulDegradation => "graceful_degradation",
        }
    }
}

impl fmt::Display for FallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Degradation depth for `graceful_degradation`; `Full` declares the
/// service unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    #[default]
    Minimal,
    Partial,
    Full,
}

/// Type-specific fallback settings. Fields irrelevant to the strategy type are
/// ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// `default_value`: constant returned as the substitute result
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,

    /// `cache`: cache key to read; defaults to the strategy's service key
    #[serde(default)]
    pub cache_key: Option<String>,

    /// `alternative_service`: registered target to delegate to
    #[serde(default)]
    pub alternative_service: Option<String>,

    /// `alternative_service`: operation on the target; defaults to the
    /// failing operation
    #[serde(default)]
    pub alternative_operation: Option<String>,

    /// `queue_for_later`: delay before the queued work becomes eligible
    #[serde(default)]
    pub retry_after_ms: Option<u64>,

    /// `graceful_degradation`
    #[serde(default)]
    pub degradation_level: Option<DegradationLevel>,

    /// `graceful_degradation`: user-facing message
    #[serde(default)]
    pub message: Option<String>,

    /// `graceful_degradation` at `partial`: payload served instead of live data
    #[serde(default)]
    pub partial_data: Option<serde_json::Value>,

    /// `graceful_degradation`: features reported as disabled
    #[serde(default)]
    pub disabled_features: Vec<String>,
}

/// A registered fallback for one (service, operation) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackStrategy {
    pub id: String,
    pub service: String,
    pub operation: String,
    #[serde(rename = "type")]
    pub fallback_type: FallbackType,
    #[serde(default)]
    pub config: FallbackConfig,
    pub is_active: bool,
    pub priority: i32,
}

impl FallbackStrategy {
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        fallback_type: FallbackType,
    ) -> Self {
        let service = service.into();
        let operation = operation.into();
        Self {
            id: format!("{service}:{operation}:{fallback_type}"),
            service,
            operation,
            fallback_type,
            config: FallbackConfig::default(),
            is_active: true,
            priority: 0,
        }
    }

    /// Shorthand for a `default_value` strategy
    pub fn default_value(
        service: impl Into<String>,
        operation: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self::new(service, operation, FallbackType::DefaultValue).with_config(FallbackConfig {
            default_value: Some(value),
            ..Default::default()
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_config(mut self, config: FallbackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.service.clone(), self.operation.clone())
    }
}
