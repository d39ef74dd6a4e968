//! # Retry Scheduler
//!
//! Computes backoff for failed records and keeps per-(service, operation)
//! queues of record ids waiting for their retry time.
//!
//! The scheduler never re-invokes a failed operation. When a retry becomes
//! due the short sweep moves the record back to `active`, bumps its retry
//! count and publishes `RetryReady`; whoever owns the operation decides
//! whether to attempt it again. Resolving a record before its retry is due
//! cancels the retry.

use crate::config::RetryConfig;
use crate::error::{RecoveryError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::models::{ErrorCategory, ErrorStatus, RetryStrategy, ServiceKey};
use crate::orchestration::backoff_calculator::{BackoffCalculator, BackoffResult};
use crate::orchestration::error_store::ErrorRecordStore;
use crate::storage::PersistenceWriter;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of [`RetryScheduler::schedule_retry`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Record moved to `retrying` and queued
    Scheduled {
        retry_count: u32,
        delay_ms: u64,
        next_retry_at: DateTime<Utc>,
    },
    /// A retry is already queued for the record
    AlreadyScheduled { next_retry_at: Option<DateTime<Utc>> },
    /// Retry budget used up; the record is now `failed`
    Exhausted { retry_count: u32, max_retries: u32 },
    /// Record is terminal or its category is not covered by the strategy
    NotEligible { reason: String },
}

impl RetryDecision {
    /// True when a retry is (or already was) pending after the call
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            RetryDecision::Scheduled { .. } | RetryDecision::AlreadyScheduled { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct QueuedRetry {
    error_id: Uuid,
    due_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RetryScheduler {
    config: RetryConfig,
    store: Arc<ErrorRecordStore>,
    writer: Arc<PersistenceWriter>,
    events: EventPublisher,
    record_ttl: Duration,
    queues: Mutex<HashMap<ServiceKey, Vec<QueuedRetry>>>,
}

impl RetryScheduler {
    pub fn new(
        config: RetryConfig,
        store: Arc<ErrorRecordStore>,
        writer: Arc<PersistenceWriter>,
        events: EventPublisher,
        record_ttl: Duration,
    ) -> Self {
        Self {
            config,
            store,
            writer,
            events,
            record_ttl,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Strategy that applies to a record without an explicit override
    pub fn strategy_for(&self, category: ErrorCategory) -> &RetryStrategy {
        self.config.strategy_for(category)
    }

    /// Schedule the next retry of a record.
    ///
    /// A record with no budget left, including every non-retryable record
    /// (their budget is zero), is marked `failed`. Fails with
    /// `RecordNotFound` for unknown ids.
    pub async fn schedule_retry(
        &self,
        error_id: Uuid,
        strategy_override: Option<&RetryStrategy>,
    ) -> Result<RetryDecision> {
        let record = self
            .store
            .get(&error_id)
            .ok_or(RecoveryError::RecordNotFound(error_id))?;
        let strategy = strategy_override.unwrap_or_else(|| self.strategy_for(record.category()));

        let (decision, updated) = self
            .store
            .update_persisted(&error_id, &self.writer, self.record_ttl, |record| {
                if record.status.is_terminal() {
                    return RetryDecision::NotEligible {
                        reason: format!("record is {}", record.status),
                    };
                }
                if record.status == ErrorStatus::Retrying {
                    return RetryDecision::AlreadyScheduled {
                        next_retry_at: record.next_retry_at,
                    };
                }
                if record.retry_count >= record.max_retries || !record.classification.is_retryable {
                    record.status = ErrorStatus::Failed;
                    record.next_retry_at = None;
                    return RetryDecision::Exhausted {
                        retry_count: record.retry_count,
                        max_retries: record.max_retries,
                    };
                }
                if !strategy.covers(record.category()) {
                    return RetryDecision::NotEligible {
                        reason: format!("category {} is not retryable by strategy", record.category()),
                    };
                }

                let BackoffResult {
                    delay,
                    next_retry_at,
                    ..
                } = BackoffCalculator::calculate_for_context(
                    strategy,
                    record.retry_count,
                    &record.context,
                );
                record.status = ErrorStatus::Retrying;
                record.next_retry_at = Some(next_retry_at);
                RetryDecision::Scheduled {
                    retry_count: record.retry_count,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    next_retry_at,
                }
            })
            .await
            .ok_or(RecoveryError::RecordNotFound(error_id))?;

        let key = updated.service_key();
        match &decision {
            RetryDecision::Scheduled {
                retry_count,
                delay_ms,
                next_retry_at,
            } => {
                self.enqueue(key.clone(), error_id, *next_retry_at);
                debug!(
                    error_id = %error_id,
                    key = %key,
                    retry_count = retry_count,
                    delay_ms = delay_ms,
                    "⏳ Retry scheduled"
                );
                self.events.publish(DomainEvent::RetryScheduled {
                    error_id,
                    key,
                    retry_count: *retry_count,
                    delay_ms: *delay_ms,
                    next_retry_at: *next_retry_at,
                });
            }
            RetryDecision::Exhausted {
                retry_count,
                max_retries,
            } => {
                warn!(
                    error_id = %error_id,
                    key = %key,
                    retry_count = retry_count,
                    max_retries = max_retries,
                    "Retry budget exhausted, marking record failed"
                );
                self.events.publish(DomainEvent::MaxRetriesExceeded {
                    error_id,
                    key,
                    retry_count: *retry_count,
                    max_retries: *max_retries,
                });
            }
            RetryDecision::AlreadyScheduled { .. } | RetryDecision::NotEligible { .. } => {
                debug!(error_id = %error_id, decision = ?decision, "Retry not scheduled");
            }
        }

        Ok(decision)
    }

    /// Drain every due retry. Returns the ids that became ready.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let due = self.take_due(now);
        let mut ready = Vec::with_capacity(due.len());

        for error_id in due {
            let updated = self
                .store
                .update_persisted(&error_id, &self.writer, self.record_ttl, |record| {
                    if record.status != ErrorStatus::Retrying {
                        return false;
                    }
                    record.retry_count = (record.retry_count + 1).min(record.max_retries);
                    record.status = ErrorStatus::Active;
                    record.next_retry_at = None;
                    true
                })
                .await;
            let Some((was_retrying, record)) = updated else {
                continue;
            };

            if !was_retrying {
                // Resolved (or otherwise settled) before the retry came due
                continue;
            }

            self.events.publish(DomainEvent::RetryReady {
                error_id,
                key: record.service_key(),
                retry_count: record.retry_count,
            });
            ready.push(error_id);
        }

        if !ready.is_empty() {
            info!(ready = ready.len(), remaining = self.queue_depth(), "🔁 Retries ready");
        }
        ready
    }

    /// Remove a record from every queue. Returns whether it was queued.
    pub fn cancel(&self, error_id: &Uuid) -> bool {
        let mut queues = self.queues.lock();
        let mut removed = false;
        queues.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|entry| entry.error_id != *error_id);
            removed |= queue.len() != before;
            !queue.is_empty()
        });
        removed
    }

    /// Put a record that is already `retrying` back on its queue, e.g.
    /// after a restore
    pub fn requeue(&self, key: ServiceKey, error_id: Uuid, due_at: DateTime<Utc>) {
        self.enqueue(key, error_id, due_at);
    }

    pub fn queue_depth(&self) -> usize {
        self.queues.lock().values().map(Vec::len).sum()
    }

    /// Queued record ids for one key, in due order
    pub fn queued_for(&self, key: &ServiceKey) -> Vec<Uuid> {
        self.queues
            .lock()
            .get(key)
            .map(|queue| queue.iter().map(|entry| entry.error_id).collect())
            .unwrap_or_default()
    }

    fn enqueue(&self, key: ServiceKey, error_id: Uuid, due_at: DateTime<Utc>) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(key).or_default();
        queue.retain(|entry| entry.error_id != error_id);
        let position = queue.partition_point(|entry| entry.due_at <= due_at);
        queue.insert(position, QueuedRetry { error_id, due_at });
    }

    /// Rebuild each queue without its due entries, returning the due ids
    fn take_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut queues = self.queues.lock();
        let mut due = Vec::new();
        for queue in queues.values_mut() {
            let (ready, waiting): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|entry| entry.due_at <= now);
            due.extend(ready.into_iter().map(|entry| entry.error_id));
            *queue = waiting;
        }
        queues.retain(|_, queue| !queue.is_empty());
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorClassification, ErrorContext, ErrorRecord};
    use crate::storage::InMemoryKeyValueStore;

    struct Fixture {
        store: Arc<ErrorRecordStore>,
        scheduler: RetryScheduler,
        events: EventPublisher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(ErrorRecordStore::new());
        let events = EventPublisher::new(64);
        let mut config = RetryConfig::default();
        config.default_strategy.jitter = false;
        let scheduler = RetryScheduler::new(
            config,
            store.clone(),
            Arc::new(PersistenceWriter::new(Arc::new(InMemoryKeyValueStore::new()))),
            events.clone(),
            Duration::from_secs(3600),
        );
        Fixture {
            store,
            scheduler,
            events,
        }
    }

    fn insert(store: &ErrorRecordStore, category: ErrorCategory, max_retries: u32) -> Uuid {
        let classification = ErrorClassification::for_category(category);
        let record = ErrorRecord {
            id: Uuid::new_v4(),
            error_code: "E".to_string(),
            error_message: "failure".to_string(),
            max_retries: if classification.is_retryable { max_retries } else { 0 },
            classification,
            context: ErrorContext::new("svc", "op"),
            timestamp: Utc::now(),
            status: ErrorStatus::Active,
            retry_count: 0,
            next_retry_at: None,
            resolved_at: None,
            resolution: None,
            correlation_id: None,
            parent_error_id: None,
            child_error_ids: Vec::new(),
        };
        let id = record.id;
        store.insert(record);
        id
    }

    #[tokio::test]
    async fn test_schedule_and_drain() {
        let f = fixture();
        let id = insert(&f.store, ErrorCategory::Network, 5);

        let decision = f.scheduler.schedule_retry(id, None).await.unwrap();
        assert!(matches!(
            decision,
            RetryDecision::Scheduled { retry_count: 0, delay_ms: 1000, .. }
        ));
        assert_eq!(f.store.get(&id).unwrap().status, ErrorStatus::Retrying);
        assert_eq!(f.scheduler.queued_for(&ServiceKey::new("svc", "op")), vec![id]);

        // Scheduling again while queued does not double-enqueue
        let again = f.scheduler.schedule_retry(id, None).await.unwrap();
        assert!(matches!(again, RetryDecision::AlreadyScheduled { .. }));
        assert_eq!(f.scheduler.queue_depth(), 1);

        // Not due yet
        assert!(f.scheduler.process_due(Utc::now()).await.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(f.scheduler.process_due(later).await, vec![id]);
        let record = f.store.get(&id).unwrap();
        assert_eq!(record.status, ErrorStatus::Active);
        assert_eq!(record.retry_count, 1);
        assert_eq!(f.scheduler.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_zero_budget_marks_failed() {
        let f = fixture();
        let mut events = f.events.subscribe();
        let id = insert(&f.store, ErrorCategory::Network, 0);

        let decision = f.scheduler.schedule_retry(id, None).await.unwrap();
        assert_eq!(
            decision,
            RetryDecision::Exhausted {
                retry_count: 0,
                max_retries: 0
            }
        );
        assert_eq!(f.store.get(&id).unwrap().status, ErrorStatus::Failed);
        assert!(matches!(
            events.recv().await.unwrap().event,
            DomainEvent::MaxRetriesExceeded { .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_count_never_exceeds_budget() {
        let f = fixture();
        let id = insert(&f.store, ErrorCategory::Timeout, 2);
        let far_future = Utc::now() + chrono::Duration::hours(1);

        for _ in 0..2 {
            assert!(f.scheduler.schedule_retry(id, None).await.unwrap().is_pending());
            f.scheduler.process_due(far_future).await;
        }
        let decision = f.scheduler.schedule_retry(id, None).await.unwrap();
        assert!(matches!(decision, RetryDecision::Exhausted { .. }));

        let record = f.store.get(&id).unwrap();
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.status, ErrorStatus::Failed);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let f = fixture();
        let mut events = f.events.subscribe();
        let id = insert(&f.store, ErrorCategory::Validation, 5);

        let decision = f.scheduler.schedule_retry(id, None).await.unwrap();
        assert_eq!(
            decision,
            RetryDecision::Exhausted {
                retry_count: 0,
                max_retries: 0
            }
        );
        assert_eq!(f.store.get(&id).unwrap().status, ErrorStatus::Failed);
        assert_eq!(f.scheduler.queue_depth(), 0);
        assert!(matches!(
            events.recv().await.unwrap().event,
            DomainEvent::MaxRetriesExceeded { .. }
        ));

        // Terminal now, so a second request changes nothing
        assert!(matches!(
            f.scheduler.schedule_retry(id, None).await.unwrap(),
            RetryDecision::NotEligible { .. }
        ));

        let unknown = Uuid::new_v4();
        assert_eq!(
            f.scheduler.schedule_retry(unknown, None).await,
            Err(RecoveryError::RecordNotFound(unknown))
        );
    }

    #[tokio::test]
    async fn test_strategy_override_and_coverage() {
        let f = fixture();
        let id = insert(&f.store, ErrorCategory::Network, 5);

        let narrow = RetryStrategy::fixed(Duration::from_millis(10))
            .with_categories([ErrorCategory::Timeout]);
        let decision = f.scheduler.schedule_retry(id, Some(&narrow)).await.unwrap();
        assert!(matches!(decision, RetryDecision::NotEligible { .. }));

        let fixed = RetryStrategy::fixed(Duration::from_millis(10)).with_jitter(false);
        let decision = f.scheduler.schedule_retry(id, Some(&fixed)).await.unwrap();
        assert!(matches!(decision, RetryDecision::Scheduled { delay_ms: 10, .. }));
    }

    #[tokio::test]
    async fn test_resolved_records_are_skipped_by_sweep() {
        let f = fixture();
        let id = insert(&f.store, ErrorCategory::Network, 5);
        f.scheduler.schedule_retry(id, None).await.unwrap();
        f.store.update(&id, |record| record.status = ErrorStatus::Resolved);

        let later = Utc::now() + chrono::Duration::minutes(5);
        assert!(f.scheduler.process_due(later).await.is_empty());
        assert_eq!(f.store.get(&id).unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let f = fixture();
        let id = insert(&f.store, ErrorCategory::Network, 5);
        f.scheduler.schedule_retry(id, None).await.unwrap();
        assert!(f.scheduler.cancel(&id));
        assert!(!f.scheduler.cancel(&id));
        assert_eq!(f.scheduler.queue_depth(), 0);
    }
}
