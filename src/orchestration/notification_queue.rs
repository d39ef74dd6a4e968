//! # Notification Queue
//!
//! Outbound alerts about error records. Queueing derives channel, priority
//! and audience from severity alone; delivery happens later in the short
//! sweep through a [`NotificationTransport`].

use crate::config::NotificationConfig;
use crate::error::{RecoveryError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::logging::log_error_operation;
use crate::models::{
    ErrorNotification, ErrorRecord, ErrorSeverity, NotificationChannel, NotificationPriority,
    NotificationStatus,
};
use crate::orchestration::error_store::ErrorRecordStore;
use crate::storage::PersistenceWriter;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ESCALATION_TEMPLATE: &str = "error_escalation";

/// Delivers a notification to its recipients
#[async_trait]
pub trait NotificationTransport: Send + Sync + fmt::Debug {
    async fn deliver(&self, notification: &ErrorNotification) -> anyhow::Result<()>;
}

/// Transport that only writes the notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn deliver(&self, notification: &ErrorNotification) -> anyhow::Result<()> {
        info!(
            notification_id = %notification.id,
            error_id = %notification.error_id,
            channel = %notification.channel,
            recipients = ?notification.recipients,
            template = %notification.template,
            "📣 Notification delivered"
        );
        Ok(())
    }
}

/// Channel, priority and template for a severity
pub fn routing_for(severity: ErrorSeverity) -> (NotificationChannel, NotificationPriority, &'static str) {
    match severity {
        ErrorSeverity::Critical => (
            NotificationChannel::Slack,
            NotificationPriority::Urgent,
            "critical_error_alert",
        ),
        ErrorSeverity::High => (
            NotificationChannel::Email,
            NotificationPriority::High,
            "high_error_alert",
        ),
        ErrorSeverity::Medium | ErrorSeverity::Low => (
            NotificationChannel::Dashboard,
            NotificationPriority::Low,
            "error_summary",
        ),
    }
}

/// Counts from one delivery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct NotificationQueue {
    config: NotificationConfig,
    store: Arc<ErrorRecordStore>,
    writer: Arc<PersistenceWriter>,
    events: EventPublisher,
    transport: Arc<dyn NotificationTransport>,
    record_ttl: Duration,
    notifications: DashMap<Uuid, ErrorNotification>,
    // One delivery pass at a time so no notification is sent twice
    delivery: tokio::sync::Mutex<()>,
}

impl NotificationQueue {
    pub fn new(
        config: NotificationConfig,
        store: Arc<ErrorRecordStore>,
        writer: Arc<PersistenceWriter>,
        events: EventPublisher,
        transport: Arc<dyn NotificationTransport>,
        record_ttl: Duration,
    ) -> Self {
        Self {
            config,
            store,
            writer,
            events,
            transport,
            record_ttl,
            notifications: DashMap::new(),
            delivery: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue a notification for a record based on its severity
    pub fn queue_notification(&self, record: &ErrorRecord) -> ErrorNotification {
        let severity = record.classification.severity;
        let (channel, priority, template) = routing_for(severity);
        let recipients = match severity {
            ErrorSeverity::Critical => self.config.critical_recipients.clone(),
            ErrorSeverity::High => self.config.high_recipients.clone(),
            ErrorSeverity::Medium | ErrorSeverity::Low => self.config.default_recipients.clone(),
        };

        let notification =
            ErrorNotification::pending(record.id, channel, recipients, template, priority);
        self.enqueue(notification.clone());
        notification
    }

    /// Raise a record's escalation level and alert the widened audience.
    /// Returns the new level.
    pub async fn escalate(&self, error_id: Uuid) -> Result<u32> {
        let (level, record) = self
            .store
            .update_persisted(&error_id, &self.writer, self.record_ttl, |record| {
                record.classification.escalate()
            })
            .await
            .ok_or(RecoveryError::RecordNotFound(error_id))?;

        let mut notification = ErrorNotification::pending(
            error_id,
            NotificationChannel::Slack,
            self.config.escalation_recipients(level),
            ESCALATION_TEMPLATE,
            NotificationPriority::Urgent,
        );
        notification.escalation_level = Some(level);
        self.enqueue(notification);

        log_error_operation(
            "escalate",
            Some(error_id),
            Some(&record.context.service),
            Some(record.category().as_str()),
            "escalated",
            Some(&format!("level {level}")),
        );
        self.events.publish(DomainEvent::ErrorEscalated {
            error_id,
            escalation_level: level,
        });
        Ok(level)
    }

    /// Send every pending notification, most urgent first
    pub async fn deliver_pending(&self) -> DeliveryReport {
        let _guard = self.delivery.lock().await;

        let mut pending: Vec<ErrorNotification> = self
            .notifications
            .iter()
            .filter(|entry| entry.status == NotificationStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let mut report = DeliveryReport::default();
        for notification in pending {
            let outcome = self.transport.deliver(&notification).await;
            let Some(mut entry) = self.notifications.get_mut(&notification.id) else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    entry.status = NotificationStatus::Sent;
                    entry.sent_at = Some(Utc::now());
                    report.sent += 1;
                    drop(entry);
                    self.events.publish(DomainEvent::NotificationSent {
                        notification_id: notification.id,
                        error_id: notification.error_id,
                    });
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    entry.status = NotificationStatus::Failed;
                    entry.failure_reason = Some(reason.clone());
                    report.failed += 1;
                    drop(entry);
                    warn!(
                        notification_id = %notification.id,
                        channel = %notification.channel,
                        error = %reason,
                        "Notification delivery failed"
                    );
                    self.events.publish(DomainEvent::NotificationFailed {
                        notification_id: notification.id,
                        error_id: notification.error_id,
                        reason,
                    });
                }
            }
        }

        if report.sent + report.failed > 0 {
            debug!(sent = report.sent, failed = report.failed, "Notification delivery pass finished");
        }
        report
    }

    pub fn get(&self, id: &Uuid) -> Option<ErrorNotification> {
        self.notifications.get(id).map(|entry| entry.clone())
    }

    /// Notifications raised for a record, oldest first
    pub fn for_error(&self, error_id: &Uuid) -> Vec<ErrorNotification> {
        let mut notifications: Vec<ErrorNotification> = self
            .notifications
            .iter()
            .filter(|entry| entry.error_id == *error_id)
            .map(|entry| entry.value().clone())
            .collect();
        notifications.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        notifications
    }

    pub fn pending_count(&self) -> usize {
        self.notifications
            .iter()
            .filter(|entry| entry.status == NotificationStatus::Pending)
            .count()
    }

    /// Drop delivered or failed notifications belonging to purged records
    pub fn forget_errors(&self, error_ids: &[Uuid]) -> usize {
        let before = self.notifications.len();
        self.notifications.retain(|_, notification| {
            notification.status == NotificationStatus::Pending
                || !error_ids.contains(&notification.error_id)
        });
        before - self.notifications.len()
    }

    fn enqueue(&self, notification: ErrorNotification) {
        debug!(
            notification_id = %notification.id,
            error_id = %notification.error_id,
            channel = %notification.channel,
            priority = ?notification.priority,
            "Notification queued"
        );
        self.events.publish(DomainEvent::NotificationQueued {
            notification_id: notification.id,
            error_id: notification.error_id,
            channel: notification.channel,
            priority: notification.priority,
        });
        self.notifications.insert(notification.id, notification);
    }
}
