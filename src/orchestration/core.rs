//! # Recovery Engine
//!
//! One object per process that wires the recovery components together and
//! exposes the public operations. Collaborators receive it by reference
//! (usually `Arc<RecoveryEngine>`); there is no global instance.
//!
//! ## Recording an error
//!
//! [`RecoveryEngine::record_error`] runs its side effects in a fixed order:
//!
//! 1. classify and persist the record
//! 2. count a failure on the (service, operation) circuit breaker
//! 3. queue a notification for high and critical severities
//! 4. schedule a retry when the record is retryable with budget left
//! 5. run the matching recovery workflow, if any
//! 6. publish `ErrorRecorded` with the record as it stands afterwards
//!
//! Failures in steps 3 to 5 are logged and published but never turn into an
//! error for the caller.

use crate::config::{ConfigManager, RecoveryConfig};
use crate::error::{CircuitBreakerError, RecoveryError, Result};
use crate::events::{DomainEvent, EventPublisher, PublishedEvent};
use crate::logging::log_error_operation;
use crate::models::{
    ErrorClassification, ErrorContext, ErrorMetrics, ErrorRecord, ErrorRecordFilter, ErrorStatus,
    FallbackStrategy, HealthStatus, ObservedError, RecoveryWorkflow, RetryStrategy, ServiceKey,
};
use crate::orchestration::error_classifier::{ErrorClassifier, RuleBasedErrorClassifier};
use crate::orchestration::error_store::ErrorRecordStore;
use crate::orchestration::fallback_executor::{
    AlternativeService, FallbackExecutor, FallbackResult, QueuedOperation,
};
use crate::orchestration::metrics_aggregator::MetricsAggregator;
use crate::orchestration::notification_queue::{
    LoggingTransport, NotificationQueue, NotificationTransport,
};
use crate::orchestration::retry_scheduler::{RetryDecision, RetryScheduler};
use crate::orchestration::sweeper::{RecoverySweeper, SweepTargets};
use crate::orchestration::workflow_engine::{RecoveryExecution, WorkflowEngine};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerSnapshot};
use crate::storage::{namespaces, InMemoryKeyValueStore, KeyValueStore, PersistenceWriter};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Failure returned by [`RecoveryEngine::execute_and_record`]
#[derive(Debug)]
pub struct RecordedFailure<E> {
    pub error: CircuitBreakerError<E>,
    /// Record created for the failure. `None` when the breaker rejected the
    /// call or the record could not be created.
    pub error_id: Option<Uuid>,
}

impl<E: fmt::Display> fmt::Display for RecordedFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_id {
            Some(id) => write!(f, "{} (error record {id})", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RecordedFailure<E> {}

/// Counts of state reloaded by [`RecoveryEngine::restore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub error_records: usize,
    pub circuit_breakers: usize,
    pub fallback_strategies: usize,
    pub recovery_workflows: usize,
    pub requeued_retries: usize,
}

/// Builder for [`RecoveryEngine`]; every collaborator has a default
#[derive(Debug, Default)]
pub struct RecoveryEngineBuilder {
    config_manager: Option<Arc<ConfigManager>>,
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn NotificationTransport>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl RecoveryEngineBuilder {
    pub fn config_manager(mut self, config_manager: Arc<ConfigManager>) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notification_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> Result<RecoveryEngine> {
        let config_manager = match self.config_manager {
            Some(config_manager) => config_manager,
            None => ConfigManager::from_config(RecoveryConfig::default())?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LoggingTransport));
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(RuleBasedErrorClassifier::new()));

        Ok(RecoveryEngine::assemble(config_manager, store, transport, classifier))
    }
}

#[derive(Debug)]
pub struct RecoveryEngine {
    config_manager: Arc<ConfigManager>,
    classifier: Arc<dyn ErrorClassifier>,
    records: Arc<ErrorRecordStore>,
    writer: Arc<PersistenceWriter>,
    events: EventPublisher,
    breakers: Arc<CircuitBreakerManager>,
    scheduler: Arc<RetryScheduler>,
    fallback: Arc<FallbackExecutor>,
    notifications: Arc<NotificationQueue>,
    workflows: Arc<WorkflowEngine>,
    aggregator: Arc<MetricsAggregator>,
    sweeper: RecoverySweeper,
}

impl RecoveryEngine {
    pub fn builder() -> RecoveryEngineBuilder {
        RecoveryEngineBuilder::default()
    }

    /// Engine with configuration loaded from the environment, backed by the
    /// given store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        info!("🔧 Initializing RecoveryEngine with auto-detected environment configuration");
        let config_manager = ConfigManager::load()?;
        Self::builder()
            .config_manager(config_manager)
            .store(store)
            .build()
    }

    fn assemble(
        config_manager: Arc<ConfigManager>,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn NotificationTransport>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        let config = config_manager.config().clone();
        let record_ttl = config.retention.error_record_ttl();

        info!(
            environment = %config_manager.environment(),
            store = %store.store_name(),
            "🔧 Assembling RecoveryEngine"
        );
        if config.circuit_breakers.enabled {
            info!("🛡️ Circuit breakers enabled in configuration");
        } else {
            info!("📤 Circuit breakers disabled in configuration");
        }

        let writer = Arc::new(PersistenceWriter::new(store));
        let events = EventPublisher::new(config.events.channel_capacity);
        let records = Arc::new(ErrorRecordStore::new());

        let breakers = Arc::new(CircuitBreakerManager::new(
            config.circuit_breakers.clone(),
            writer.clone(),
            events.clone(),
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            config.retry.clone(),
            records.clone(),
            writer.clone(),
            events.clone(),
            record_ttl,
        ));
        let fallback = Arc::new(FallbackExecutor::new(writer.clone(), events.clone()));
        let notifications = Arc::new(NotificationQueue::new(
            config.notifications.clone(),
            records.clone(),
            writer.clone(),
            events.clone(),
            transport,
            record_ttl,
        ));
        let workflows = Arc::new(WorkflowEngine::new(
            records.clone(),
            scheduler.clone(),
            fallback.clone(),
            notifications.clone(),
            writer.clone(),
            events.clone(),
        ));
        let aggregator = Arc::new(MetricsAggregator::new(
            config.health.clone(),
            records.clone(),
            breakers.clone(),
            scheduler.clone(),
            notifications.clone(),
            events.clone(),
        ));
        let sweeper = RecoverySweeper::new(
            SweepTargets {
                store: records.clone(),
                scheduler: scheduler.clone(),
                notifications: notifications.clone(),
                aggregator: aggregator.clone(),
                writer: writer.clone(),
                retention: record_ttl,
            },
            config.sweeps.retry_interval(),
            config.sweeps.metrics_interval(),
        );

        info!("✅ RecoveryEngine initialized");
        Self {
            config_manager,
            classifier,
            records,
            writer,
            events,
            breakers,
            scheduler,
            fallback,
            notifications,
            workflows,
            aggregator,
            sweeper,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        self.config_manager.config()
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn retry_scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    pub fn fallback_executor(&self) -> &Arc<FallbackExecutor> {
        &self.fallback
    }

    pub fn notifications(&self) -> &Arc<NotificationQueue> {
        &self.notifications
    }

    pub fn workflow_engine(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    pub fn sweeper(&self) -> &RecoverySweeper {
        &self.sweeper
    }

    pub fn persistence(&self) -> &Arc<PersistenceWriter> {
        &self.writer
    }

    /// Subscribe to domain events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.events.subscribe()
    }

    /// Record a failure and start recovery for it.
    ///
    /// Fails with `InvalidContext` when service or operation is blank; such
    /// calls are not recorded.
    pub async fn record_error(
        &self,
        error: ObservedError,
        context: ErrorContext,
        classification: Option<ErrorClassification>,
    ) -> Result<Uuid> {
        let count_failure = self.config().circuit_breakers.count_recorded_errors;
        self.record(error, context, classification, count_failure).await
    }

    async fn record(
        &self,
        error: ObservedError,
        context: ErrorContext,
        classification: Option<ErrorClassification>,
        count_failure: bool,
    ) -> Result<Uuid> {
        if !context.is_valid() {
            return Err(RecoveryError::InvalidContext(
                "service and operation are required".to_string(),
            ));
        }

        let classification =
            classification.unwrap_or_else(|| self.classifier.classify(&error, &context));
        let max_retries = self.scheduler.strategy_for(classification.category).max_retries;
        let record = ErrorRecord::new(&error, context, classification).with_max_retries(max_retries);
        let error_id = record.id;
        let key = record.service_key();

        if let Some(parent_id) = record.parent_error_id {
            let linked = self
                .records
                .add_child(&parent_id, error_id, &self.writer, self.record_ttl())
                .await;
            if !linked {
                debug!(error_id = %error_id, parent_id = %parent_id, "Parent error record not found");
            }
        }

        self.records
            .insert_persisted(record.clone(), &self.writer, self.record_ttl())
            .await;
        log_error_operation(
            "record",
            Some(error_id),
            Some(&key.service),
            Some(record.category().as_str()),
            record.status.as_str(),
            Some(&record.error_message),
        );

        if count_failure {
            self.breakers.record_failure(&key).await;
        }

        if record.classification.severity.requires_notification() {
            self.notifications.queue_notification(&record);
        }

        if record.classification.is_retryable && record.has_retry_budget() {
            if let Err(e) = self.scheduler.schedule_retry(error_id, None).await {
                warn!(error_id = %error_id, error = %e, "Failed to schedule retry");
            }
        }

        if let Err(e) = self.workflows.execute_for_record(error_id).await {
            warn!(error_id = %error_id, error = %e, "Recovery workflow could not run");
        }

        let recorded = self.records.get(&error_id).unwrap_or(record);
        self.events.publish(DomainEvent::ErrorRecorded {
            record: Box::new(recorded),
        });
        Ok(error_id)
    }

    /// Run an operation under the circuit breaker for (service, operation).
    /// Breaker rejections are returned without invoking the operation.
    pub async fn execute_with_circuit_breaker<F, Fut, T, E>(
        &self,
        service: &str,
        operation: &str,
        config: Option<&CircuitBreakerConfig>,
        unit_of_work: F,
    ) -> std::result::Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = ServiceKey::new(service, operation);
        self.breakers.call(&key, config, unit_of_work).await
    }

    /// Run an operation under its circuit breaker and record a failure.
    ///
    /// The breaker counts the failure once, through the protected call; the
    /// record does not count it again. Rejections are not recorded.
    pub async fn execute_and_record<F, Fut, T, E>(
        &self,
        context: ErrorContext,
        unit_of_work: F,
    ) -> std::result::Result<T, RecordedFailure<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let key = context.service_key();
        match self.breakers.call(&key, None, unit_of_work).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::OperationFailed(error)) => {
                let observed = ObservedError::new(error.to_string());
                let error_id = match self.record(observed, context, None, false).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to record operation failure");
                        None
                    }
                };
                Err(RecordedFailure {
                    error: CircuitBreakerError::OperationFailed(error),
                    error_id,
                })
            }
            Err(rejection) => Err(RecordedFailure {
                error: rejection,
                error_id: None,
            }),
        }
    }

    pub async fn schedule_retry(
        &self,
        error_id: Uuid,
        strategy: Option<&RetryStrategy>,
    ) -> Result<RetryDecision> {
        self.scheduler.schedule_retry(error_id, strategy).await
    }

    /// Produce a substitute result for (service, operation)
    pub async fn execute_fallback(
        &self,
        service: &str,
        operation: &str,
        error_id: Option<Uuid>,
        data: Option<Value>,
    ) -> Result<FallbackResult> {
        let record = match error_id {
            Some(id) => Some(
                self.records
                    .get(&id)
                    .ok_or(RecoveryError::RecordNotFound(id))?,
            ),
            None => None,
        };
        self.fallback
            .execute(&ServiceKey::new(service, operation), record.as_ref(), data)
            .await
    }

    pub async fn add_fallback_strategy(&self, strategy: FallbackStrategy) -> Result<()> {
        self.fallback.add_strategy(strategy).await
    }

    pub async fn add_recovery_workflow(&self, workflow: RecoveryWorkflow) -> Result<()> {
        self.workflows.add_workflow(workflow).await
    }

    pub async fn execute_recovery_workflow(
        &self,
        workflow_id: &str,
        error_id: Uuid,
    ) -> Result<RecoveryExecution> {
        self.workflows.execute_workflow(workflow_id, error_id).await
    }

    /// Store a value for `cache` fallbacks under `cache_key`
    pub async fn cache_fallback_value(
        &self,
        cache_key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.fallback.cache_value(cache_key, value, ttl).await
    }

    pub fn register_alternative_service(
        &self,
        name: impl Into<String>,
        service: Arc<dyn AlternativeService>,
    ) {
        self.fallback.register_alternative(name, service);
    }

    pub async fn queued_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.fallback.queued_operations().await
    }

    /// Mark a record resolved and cancel any pending retry. Returns false for
    /// unknown or already resolved records, which are left untouched.
    pub async fn resolve_error(&self, error_id: Uuid, resolution: impl Into<String>) -> bool {
        let resolution = resolution.into();
        let updated = self
            .records
            .update_persisted(&error_id, &self.writer, self.record_ttl(), |record| {
                if record.status == ErrorStatus::Resolved {
                    return false;
                }
                record.status = ErrorStatus::Resolved;
                record.resolved_at = Some(chrono::Utc::now());
                record.resolution = Some(resolution.clone());
                record.next_retry_at = None;
                true
            })
            .await;
        let Some((true, record)) = updated else {
            return false;
        };

        self.scheduler.cancel(&error_id);
        log_error_operation(
            "resolve",
            Some(error_id),
            Some(&record.context.service),
            Some(record.category().as_str()),
            record.status.as_str(),
            Some(&resolution),
        );
        self.events.publish(DomainEvent::ErrorResolved {
            error_id,
            resolution,
        });
        true
    }

    /// Raise a record's escalation level. Returns the new level.
    pub async fn escalate_error(&self, error_id: Uuid) -> Result<u32> {
        self.notifications.escalate(error_id).await
    }

    pub fn get_error_record(&self, error_id: &Uuid) -> Option<ErrorRecord> {
        self.records.get(error_id)
    }

    /// Records matching the filter, newest first
    pub fn get_error_records(&self, filter: &ErrorRecordFilter) -> Vec<ErrorRecord> {
        self.records.list(filter)
    }

    pub fn get_circuit_breaker_states(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.states()
    }

    pub async fn force_open(&self, service: &str, operation: &str) -> bool {
        self.breakers.force_open(&ServiceKey::new(service, operation)).await
    }

    pub async fn force_closed(&self, service: &str, operation: &str) -> bool {
        self.breakers.force_closed(&ServiceKey::new(service, operation)).await
    }

    pub async fn reset_circuit_breaker(&self, service: &str, operation: &str) -> bool {
        self.breakers.reset(&ServiceKey::new(service, operation)).await
    }

    pub fn calculate_metrics(&self) -> ErrorMetrics {
        self.aggregator.calculate_metrics()
    }

    pub fn latest_metrics(&self) -> Option<ErrorMetrics> {
        self.aggregator.latest()
    }

    pub fn get_health_status(&self) -> HealthStatus {
        self.aggregator.get_health_status()
    }

    /// Reload persisted records, breakers, strategies and workflows.
    /// Records still `retrying` go back on their retry queue.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let records: Vec<ErrorRecord> = self.writer.read_all(namespaces::ERROR_RECORDS).await?;
        let snapshots: Vec<CircuitBreakerSnapshot> =
            self.writer.read_all(namespaces::CIRCUIT_BREAKERS).await?;
        let strategies: Vec<FallbackStrategy> =
            self.writer.read_all(namespaces::FALLBACK_STRATEGIES).await?;
        let workflows: Vec<RecoveryWorkflow> =
            self.writer.read_all(namespaces::RECOVERY_WORKFLOWS).await?;

        let mut report = RestoreReport {
            error_records: records.len(),
            ..Default::default()
        };
        for record in records {
            if let (ErrorStatus::Retrying, Some(due_at)) = (record.status, record.next_retry_at) {
                self.scheduler.requeue(record.service_key(), record.id, due_at);
                report.requeued_retries += 1;
            }
            self.records.insert(record);
        }
        report.circuit_breakers = self.breakers.restore(snapshots);
        report.fallback_strategies = self.fallback.restore(strategies);
        report.recovery_workflows = self.workflows.restore(workflows);

        info!(
            error_records = report.error_records,
            circuit_breakers = report.circuit_breakers,
            fallback_strategies = report.fallback_strategies,
            recovery_workflows = report.recovery_workflows,
            requeued_retries = report.requeued_retries,
            "♻️ Recovery state restored"
        );
        Ok(report)
    }

    /// Start the background sweeps. Returns false if already running.
    pub async fn start(&self) -> bool {
        self.sweeper.start().await
    }

    /// Stop the background sweeps and replay writes parked during an outage
    pub async fn shutdown(&self, timeout: Duration) {
        self.sweeper.stop(timeout).await;
        let flushed = self.writer.flush_pending().await;
        if flushed > 0 {
            info!(flushed, "Flushed parked writes on shutdown");
        }
    }

    fn record_ttl(&self) -> Duration {
        self.config().retention.error_record_ttl()
    }
}
