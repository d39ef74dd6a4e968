use super::classification::{ErrorCategory, ErrorSeverity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Process-wide rollup, recomputed by the metrics sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total_errors: usize,
    pub active_errors: usize,
    pub retrying_errors: usize,
    pub resolved_errors: usize,
    pub failed_errors: usize,
    pub errors_by_category: HashMap<ErrorCategory, usize>,
    pub errors_by_severity: HashMap<ErrorSeverity, usize>,
    pub errors_by_service: HashMap<String, usize>,
    /// Failed calls over all calls seen by circuit breakers (0.0 - 1.0)
    pub error_rate: f64,
    /// Resolved records over all records (0.0 - 1.0)
    pub resolution_rate: f64,
    pub average_resolution_time_ms: Option<f64>,
    pub open_circuit_breakers: usize,
    pub half_open_circuit_breakers: usize,
    pub closed_circuit_breakers: usize,
    pub circuit_openings: u64,
    pub retry_queue_depth: usize,
    pub pending_notifications: usize,
    pub calculated_at: DateTime<Utc>,
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self {
            total_errors: 0,
            active_errors: 0,
            retrying_errors: 0,
            resolved_errors: 0,
            failed_errors: 0,
            errors_by_category: HashMap::new(),
            errors_by_severity: HashMap::new(),
            errors_by_service: HashMap::new(),
            error_rate: 0.0,
            resolution_rate: 0.0,
            average_resolution_time_ms: None,
            open_circuit_breakers: 0,
            half_open_circuit_breakers: 0,
            closed_circuit_breakers: 0,
            circuit_openings: 0,
            retry_queue_depth: 0,
            pending_notifications: 0,
            calculated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub details: HealthDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub open_circuit_breakers: usize,
    pub half_open_circuit_breakers: usize,
    pub error_rate: f64,
    pub active_errors: usize,
    pub critical_active_errors: usize,
    pub retry_queue_depth: usize,
    pub pending_notifications: usize,
    pub reasons: Vec<String>,
    pub checked_at: DateTime<Utc>,
}
