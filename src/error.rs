//! Error types for the recovery engine.
//!

use crate::config::ConfigurationError;
use crate::models::ServiceKey;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryError {
    #[error("Invalid error context: {0}")]
    InvalidContext(String),
    #[error("Error record {0} not found")]
    RecordNotFound(Uuid),
    #[error("No active fallback strategy for {0}")]
    NoFallbackAvailable(ServiceKey),
    #[error("Fallback cache miss for key {0}")]
    CacheMiss(String),
    #[error("Fallback strategy {strategy_id} failed: {reason}")]
    FallbackFailed { strategy_id: String, reason: String },
    #[error("Recovery workflow {0} not found")]
    WorkflowNotFound(String),
    #[error("Recovery step {step_id} failed: {reason}")]
    StepFailed { step_id: String, reason: String },
    #[error("Recovery step {step_id} timed out after {timeout:?}")]
    StepTimeout { step_id: String, timeout: Duration },
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RecoveryError {
    fn from(error: serde_json::Error) -> Self {
        RecoveryError::Serialization(error.to_string())
    }
}

impl From<ConfigurationError> for RecoveryError {
    fn from(error: ConfigurationError) -> Self {
        RecoveryError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Errors surfaced by circuit-breaker-protected execution
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {key} (next attempt at {next_attempt_at})")]
    CircuitOpen {
        key: ServiceKey,
        next_attempt_at: DateTime<Utc>,
    },

    /// Half-open probe budget is used up, the operation was not invoked
    #[error("Circuit breaker for {key} is half-open and all {max_calls} probe calls are in use")]
    HalfOpenExhausted { key: ServiceKey, max_calls: u32 },

    /// Operation ran and failed; the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// True when the breaker refused the call without running it
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitBreakerError::OperationFailed(_))
    }

    /// Unwrap the operation error, if the operation actually ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            _ => None,
        }
    }
}
