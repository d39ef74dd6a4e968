//! # Metrics Aggregator
//!
//! Rolls up error records, circuit breakers and queues into [`ErrorMetrics`]
//! and derives a health status from breaker and error-rate thresholds.

use crate::config::HealthConfig;
use crate::events::{DomainEvent, EventPublisher};
use crate::models::{
    ErrorMetrics, ErrorSeverity, ErrorStatus, HealthDetails, HealthState, HealthStatus,
};
use crate::orchestration::error_store::ErrorRecordStore;
use crate::orchestration::notification_queue::NotificationQueue;
use crate::orchestration::retry_scheduler::RetryScheduler;
use crate::resilience::CircuitBreakerManager;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Health state for an open-breaker count and error rate, with the reasons
/// that produced it. Thresholds are exclusive.
pub fn assess_health(
    config: &HealthConfig,
    open_breakers: usize,
    error_rate: f64,
) -> (HealthState, Vec<String>) {
    let mut reasons = Vec::new();

    if open_breakers > config.unhealthy_open_breakers {
        reasons.push(format!(
            "{open_breakers} circuit breakers open (limit {})",
            config.unhealthy_open_breakers
        ));
    }
    if error_rate > config.unhealthy_error_rate {
        reasons.push(format!(
            "error rate {:.1}% above {:.1}%",
            error_rate * 100.0,
            config.unhealthy_error_rate * 100.0
        ));
    }
    if !reasons.is_empty() {
        return (HealthState::Unhealthy, reasons);
    }

    if open_breakers > config.degraded_open_breakers {
        reasons.push(format!("{open_breakers} circuit breakers open"));
    }
    if error_rate > config.degraded_error_rate {
        reasons.push(format!(
            "error rate {:.1}% above {:.1}%",
            error_rate * 100.0,
            config.degraded_error_rate * 100.0
        ));
    }
    if !reasons.is_empty() {
        return (HealthState::Degraded, reasons);
    }

    (HealthState::Healthy, reasons)
}

#[derive(Debug)]
pub struct MetricsAggregator {
    health: HealthConfig,
    store: Arc<ErrorRecordStore>,
    breakers: Arc<CircuitBreakerManager>,
    scheduler: Arc<RetryScheduler>,
    notifications: Arc<NotificationQueue>,
    events: EventPublisher,
    latest: RwLock<Option<ErrorMetrics>>,
}

impl MetricsAggregator {
    pub fn new(
        health: HealthConfig,
        store: Arc<ErrorRecordStore>,
        breakers: Arc<CircuitBreakerManager>,
        scheduler: Arc<RetryScheduler>,
        notifications: Arc<NotificationQueue>,
        events: EventPublisher,
    ) -> Self {
        Self {
            health,
            store,
            breakers,
            scheduler,
            notifications,
            events,
            latest: RwLock::new(None),
        }
    }

    /// Recompute the rollup, cache it and publish `MetricsCalculated`
    pub fn calculate_metrics(&self) -> ErrorMetrics {
        let records = self.store.snapshot_all();
        let breakers = self.breakers.system_metrics();
        let mut metrics = ErrorMetrics {
            total_errors: records.len(),
            error_rate: breakers.error_rate(),
            open_circuit_breakers: breakers.open,
            half_open_circuit_breakers: breakers.half_open,
            closed_circuit_breakers: breakers.closed,
            circuit_openings: breakers.circuit_openings,
            retry_queue_depth: self.scheduler.queue_depth(),
            pending_notifications: self.notifications.pending_count(),
            ..ErrorMetrics::default()
        };

        let mut resolution_ms_total = 0.0;
        let mut resolved_with_time = 0usize;
        for record in &records {
            match record.status {
                ErrorStatus::Active => metrics.active_errors += 1,
                ErrorStatus::Retrying => metrics.retrying_errors += 1,
                ErrorStatus::Resolved => metrics.resolved_errors += 1,
                ErrorStatus::Failed => metrics.failed_errors += 1,
                ErrorStatus::Ignored => {}
            }
            *metrics
                .errors_by_category
                .entry(record.category())
                .or_insert(0) += 1;
            *metrics
                .errors_by_severity
                .entry(record.classification.severity)
                .or_insert(0) += 1;
            *metrics
                .errors_by_service
                .entry(record.context.service.clone())
                .or_insert(0) += 1;

            if let Some(resolved_at) = record.resolved_at {
                resolution_ms_total += (resolved_at - record.timestamp).num_milliseconds() as f64;
                resolved_with_time += 1;
            }
        }

        if metrics.total_errors > 0 {
            metrics.resolution_rate = metrics.resolved_errors as f64 / metrics.total_errors as f64;
        }
        if resolved_with_time > 0 {
            metrics.average_resolution_time_ms =
                Some(resolution_ms_total / resolved_with_time as f64);
        }
        metrics.calculated_at = Utc::now();

        debug!(
            total_errors = metrics.total_errors,
            active_errors = metrics.active_errors,
            open_breakers = metrics.open_circuit_breakers,
            "📊 Metrics calculated"
        );
        *self.latest.write() = Some(metrics.clone());
        self.events.publish(DomainEvent::MetricsCalculated {
            metrics: Box::new(metrics.clone()),
        });
        metrics
    }

    /// Metrics from the last sweep, if one has run
    pub fn latest(&self) -> Option<ErrorMetrics> {
        self.latest.read().clone()
    }

    /// Current health, computed from live breaker and record state
    pub fn get_health_status(&self) -> HealthStatus {
        let breakers = self.breakers.system_metrics();
        let error_rate = breakers.error_rate();
        let (status, reasons) = assess_health(&self.health, breakers.open, error_rate);

        let active = self.store.active();
        let critical_active_errors = active
            .iter()
            .filter(|record| record.classification.severity == ErrorSeverity::Critical)
            .count();

        if status != HealthState::Healthy {
            info!(status = %status, reasons = ?reasons, "Recovery engine health check");
        }

        HealthStatus {
            status,
            details: HealthDetails {
                open_circuit_breakers: breakers.open,
                half_open_circuit_breakers: breakers.half_open,
                error_rate,
                active_errors: active.len(),
                critical_active_errors,
                retry_queue_depth: self.scheduler.queue_depth(),
                pending_notifications: self.notifications.pending_count(),
                reasons,
                checked_at: Utc::now(),
            },
        }
    }
}
