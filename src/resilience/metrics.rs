//! # Circuit Breaker Metrics
//!
//! Per-breaker call statistics and the persisted snapshot of a breaker, plus
//! the system-wide rollup used by health checks.

use crate::models::ServiceKey;
use crate::resilience::{CircuitBreakerConfig, CircuitState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Call statistics for a single circuit breaker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatistics {
    /// Calls that ran (or failures recorded against the key)
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls refused without running
    pub rejected_calls: u64,
    /// Transitions into the open state
    pub circuit_openings: u64,
    /// Running mean over calls that actually ran
    pub average_response_time_ms: f64,
    /// Number of samples behind the running mean
    pub timed_calls: u64,
}

impl CircuitBreakerStatistics {
    /// Record a call that ran, updating the running mean incrementally
    pub fn record_call(&mut self, success: bool, duration: Duration) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }

        self.timed_calls += 1;
        let sample = duration.as_secs_f64() * 1000.0;
        self.average_response_time_ms +=
            (sample - self.average_response_time_ms) / self.timed_calls as f64;
    }

    /// Record a failure reported from outside a protected call
    pub fn record_external_failure(&mut self) {
        self.total_calls += 1;
        self.failed_calls += 1;
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failed_calls as f64 / self.total_calls as f64
    }
}

/// Serializable view of a breaker, persisted on every state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub key: ServiceKey,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub config: CircuitBreakerConfig,
    pub statistics: CircuitBreakerStatistics,
}

/// System-wide circuit breaker rollup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub total_breakers: usize,
    pub open: usize,
    pub half_open: usize,
    pub closed: usize,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub circuit_openings: u64,
}

impl SystemCircuitBreakerMetrics {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a CircuitBreakerSnapshot>) -> Self {
        let mut metrics = Self::default();
        for snapshot in snapshots {
            metrics.total_breakers += 1;
            match snapshot.state {
                CircuitState::Open => metrics.open += 1,
                CircuitState::HalfOpen => metrics.half_open += 1,
                CircuitState::Closed => metrics.closed += 1,
            }
            metrics.total_calls += snapshot.statistics.total_calls;
            metrics.failed_calls += snapshot.statistics.failed_calls;
            metrics.rejected_calls += snapshot.statistics.rejected_calls;
            metrics.circuit_openings += snapshot.statistics.circuit_openings;
        }
        metrics
    }

    /// Failed calls over all calls across every breaker
    pub fn error_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failed_calls as f64 / self.total_calls as f64
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "Breakers: {} | Open: {} | Half-open: {} | Calls: {} | Error rate: {:.1}%",
            self.total_breakers,
            self.open,
            self.half_open,
            self.total_calls,
            self.error_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_average() {
        let mut stats = CircuitBreakerStatistics::default();
        stats.record_call(true, Duration::from_millis(10));
        stats.record_call(false, Duration::from_millis(30));
        stats.record_call(true, Duration::from_millis(20));

        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.failed_calls, 1);
        assert!((stats.average_response_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_external_failure_does_not_skew_average() {
        let mut stats = CircuitBreakerStatistics::default();
        stats.record_call(true, Duration::from_millis(40));
        stats.record_external_failure();

        assert_eq!(stats.total_calls, 2);
        assert!((stats.failure_rate() - 0.5).abs() < 1e-9);
        assert!((stats.average_response_time_ms - 40.0).abs() < 1e-9);
    }
}
