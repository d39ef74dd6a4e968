//! # Domain Events
//!
//! Everything the engine announces to the rest of the system. Events are
//! serialized with a `type` tag so subscribers outside the process can
//! consume the same payloads.

use crate::models::{
    ErrorMetrics, ErrorRecord, FallbackType, NotificationChannel, NotificationPriority, ServiceKey,
};
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ErrorRecorded {
        record: Box<ErrorRecord>,
    },
    ErrorResolved {
        error_id: Uuid,
        resolution: String,
    },
    RetryScheduled {
        error_id: Uuid,
        key: ServiceKey,
        retry_count: u32,
        delay_ms: u64,
        next_retry_at: DateTime<Utc>,
    },
    /// A due retry was dequeued; the owner of the operation may re-attempt it
    RetryReady {
        error_id: Uuid,
        key: ServiceKey,
        retry_count: u32,
    },
    MaxRetriesExceeded {
        error_id: Uuid,
        key: ServiceKey,
        retry_count: u32,
        max_retries: u32,
    },
    CircuitStateChanged {
        key: ServiceKey,
        from: CircuitState,
        to: CircuitState,
        failure_count: u32,
    },
    FallbackExecuting {
        key: ServiceKey,
        strategy_id: String,
        fallback_type: FallbackType,
        error_id: Option<Uuid>,
    },
    FallbackSucceeded {
        key: ServiceKey,
        strategy_id: String,
        fallback_type: FallbackType,
        error_id: Option<Uuid>,
    },
    FallbackFailed {
        key: ServiceKey,
        strategy_id: Option<String>,
        error_id: Option<Uuid>,
        reason: String,
    },
    RecoveryStarted {
        error_id: Uuid,
        workflow_id: String,
    },
    RecoveryStepCompleted {
        error_id: Uuid,
        workflow_id: String,
        step_id: String,
    },
    RecoveryStepFailed {
        error_id: Uuid,
        workflow_id: String,
        step_id: String,
        reason: String,
    },
    RecoveryCompleted {
        error_id: Uuid,
        workflow_id: String,
        steps_run: Vec<String>,
    },
    RecoveryAborted {
        error_id: Uuid,
        workflow_id: String,
        step_id: String,
        reason: String,
    },
    NotificationQueued {
        notification_id: Uuid,
        error_id: Uuid,
        channel: NotificationChannel,
        priority: NotificationPriority,
    },
    NotificationSent {
        notification_id: Uuid,
        error_id: Uuid,
    },
    NotificationFailed {
        notification_id: Uuid,
        error_id: Uuid,
        reason: String,
    },
    ErrorEscalated {
        error_id: Uuid,
        escalation_level: u32,
    },
    MetricsCalculated {
        metrics: Box<ErrorMetrics>,
    },
}

impl DomainEvent {
    /// Stable event name, matching the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ErrorRecorded { .. } => "error_recorded",
            DomainEvent::ErrorResolved { .. } => "error_resolved",
            DomainEvent::RetryScheduled { .. } => "retry_scheduled",
            DomainEvent::RetryReady { .. } => "retry_ready",
            DomainEvent::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            DomainEvent::CircuitStateChanged { .. } => "circuit_state_changed",
            DomainEvent::FallbackExecuting { .. } => "fallback_executing",
            DomainEvent::FallbackSucceeded { .. } => "fallback_succeeded",
            DomainEvent::FallbackFailed { .. } => "fallback_failed",
            DomainEvent::RecoveryStarted { .. } => "recovery_started",
            DomainEvent::RecoveryStepCompleted { .. } => "recovery_step_completed",
            DomainEvent::RecoveryStepFailed { .. } => "recovery_step_failed",
            DomainEvent::RecoveryCompleted { .. } => "recovery_completed",
            DomainEvent::RecoveryAborted { .. } => "recovery_aborted",
            DomainEvent::NotificationQueued { .. } => "notification_queued",
            DomainEvent::NotificationSent { .. } => "notification_sent",
            DomainEvent::NotificationFailed { .. } => "notification_failed",
            DomainEvent::ErrorEscalated { .. } => "error_escalated",
            DomainEvent::MetricsCalculated { .. } => "metrics_calculated",
        }
    }

    /// Error record the event concerns, when there is one
    pub fn error_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::ErrorRecorded { record } => Some(record.id),
            DomainEvent::ErrorResolved { error_id, .. }
            | DomainEvent::RetryScheduled { error_id, .. }
            | DomainEvent::RetryReady { error_id, .. }
            | DomainEvent::MaxRetriesExceeded { error_id, .. }
            | DomainEvent::RecoveryStarted { error_id, .. }
            | DomainEvent::RecoveryStepCompleted { error_id, .. }
            | DomainEvent::RecoveryStepFailed { error_id, .. }
            | DomainEvent::RecoveryCompleted { error_id, .. }
            | DomainEvent::RecoveryAborted { error_id, .. }
            | DomainEvent::NotificationQueued { error_id, .. }
            | DomainEvent::NotificationSent { error_id, .. }
            | DomainEvent::NotificationFailed { error_id, .. }
            | DomainEvent::ErrorEscalated { error_id, .. } => Some(*error_id),
            DomainEvent::FallbackExecuting { error_id, .. }
            | DomainEvent::FallbackSucceeded { error_id, .. }
            | DomainEvent::FallbackFailed { error_id, .. } => *error_id,
            DomainEvent::CircuitStateChanged { .. } | DomainEvent::MetricsCalculated { .. } => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag_matches_name() {
        let event = DomainEvent::CircuitStateChanged {
            key: ServiceKey::new("svc", "op"),
            from: CircuitState::Closed,
            to: CircuitState::Open,
            failure_count: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["to"], "open");
        assert_eq!(event.error_id(), None);
    }

    #[test]
    fn test_error_id_extraction() {
        let id = Uuid::new_v4();
        let event = DomainEvent::ErrorEscalated {
            error_id: id,
            escalation_level: 2,
        };
        assert_eq!(event.error_id(), Some(id));
    }
}
