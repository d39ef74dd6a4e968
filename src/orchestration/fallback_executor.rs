//! # Fallback Executor
//!
//! Produces a substitute result when an operation cannot succeed. One
//! strategy wins per (service, operation): the active strategy with the
//! highest priority, ties broken by id.
//!
//! | type                   | result                                             |
//! |------------------------|----------------------------------------------------|
//! | `cache`                | last cached value for the key, `CacheMiss` if none |
//! | `default_value`        | configured constant                                |
//! | `alternative_service`  | whatever the registered alternative returns        |
//! | `queue_for_later`      | acknowledgement; the work is persisted for later   |
//! | `graceful_degradation` | degraded payload for the configured level          |

use crate::error::{RecoveryError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::logging::log_recovery_operation;
use crate::models::{
    DegradationLevel, ErrorRecord, FallbackStrategy, FallbackType, ServiceKey,
};
use crate::storage::{namespaces, PersistenceWriter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input handed to an alternative service
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    /// The key whose operation failed
    pub key: ServiceKey,
    /// Operation to run on the alternative
    pub operation: String,
    pub error: Option<ErrorRecord>,
    pub data: Option<Value>,
}

/// A substitute target for `alternative_service` strategies
#[async_trait]
pub trait AlternativeService: Send + Sync + fmt::Debug {
    async fn invoke(&self, request: FallbackRequest) -> anyhow::Result<Value>;
}

/// Work deferred by a `queue_for_later` strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub key: ServiceKey,
    pub strategy_id: String,
    pub error_id: Option<Uuid>,
    pub payload: Option<Value>,
    pub queued_at: DateTime<Utc>,
    pub retry_after: DateTime<Utc>,
}

/// Successful fallback outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub strategy_id: String,
    pub fallback_type: FallbackType,
    pub value: Value,
}

const DEFAULT_QUEUE_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct FallbackExecutor {
    strategies: DashMap<String, FallbackStrategy>,
    alternatives: DashMap<String, Arc<dyn AlternativeService>>,
    writer: Arc<PersistenceWriter>,
    events: EventPublisher,
}

impl FallbackExecutor {
    pub fn new(writer: Arc<PersistenceWriter>, events: EventPublisher) -> Self {
        Self {
            strategies: DashMap::new(),
            alternatives: DashMap::new(),
            writer,
            events,
        }
    }

    /// Insert or replace a strategy by id and persist it
    pub async fn add_strategy(&self, strategy: FallbackStrategy) -> Result<()> {
        if strategy.service.trim().is_empty() || strategy.operation.trim().is_empty() {
            return Err(RecoveryError::InvalidContext(format!(
                "fallback strategy {} needs a service and an operation",
                strategy.id
            )));
        }

        self.writer
            .write(namespaces::FALLBACK_STRATEGIES, &strategy.id, &strategy, None)
            .await?;
        info!(
            strategy_id = %strategy.id,
            key = %strategy.service_key(),
            fallback_type = %strategy.fallback_type,
            priority = strategy.priority,
            "Fallback strategy registered"
        );
        self.strategies.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    pub async fn remove_strategy(&self, strategy_id: &str) -> bool {
        let removed = self.strategies.remove(strategy_id).is_some();
        if removed {
            self.writer
                .delete(namespaces::FALLBACK_STRATEGIES, strategy_id)
                .await;
        }
        removed
    }

    pub fn strategy(&self, strategy_id: &str) -> Option<FallbackStrategy> {
        self.strategies.get(strategy_id).map(|entry| entry.clone())
    }

    /// All strategies for a key, best first
    pub fn strategies_for(&self, key: &ServiceKey) -> Vec<FallbackStrategy> {
        let mut strategies: Vec<FallbackStrategy> = self
            .strategies
            .iter()
            .filter(|entry| entry.service == key.service && entry.operation == key.operation)
            .map(|entry| entry.value().clone())
            .collect();
        strategies.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        strategies
    }

    /// The single strategy that would run for a key
    pub fn resolve(&self, key: &ServiceKey) -> Option<FallbackStrategy> {
        self.strategies_for(key)
            .into_iter()
            .find(|strategy| strategy.is_active)
    }

    /// Register a target for `alternative_service` strategies
    pub fn register_alternative(&self, name: impl Into<String>, service: Arc<dyn AlternativeService>) {
        let name = name.into();
        debug!(alternative = %name, "Alternative service registered");
        self.alternatives.insert(name, service);
    }

    /// Populate the read-through cache used by `cache` strategies
    pub async fn cache_value(&self, cache_key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.writer
            .write(namespaces::FALLBACK_CACHE, cache_key, &value, ttl)
            .await?;
        Ok(())
    }

    /// Operations deferred by `queue_for_later`, oldest first
    pub async fn queued_operations(&self) -> Result<Vec<QueuedOperation>> {
        let mut operations: Vec<QueuedOperation> =
            self.writer.read_all(namespaces::QUEUED_OPERATIONS).await?;
        operations.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(operations)
    }

    /// Acknowledge a deferred operation once its owner has run it
    pub async fn complete_queued_operation(&self, id: Uuid) -> bool {
        self.writer
            .delete(namespaces::QUEUED_OPERATIONS, &id.to_string())
            .await
    }

    /// Reinstate strategies loaded from the store
    pub fn restore(&self, strategies: Vec<FallbackStrategy>) -> usize {
        let count = strategies.len();
        for strategy in strategies {
            self.strategies.insert(strategy.id.clone(), strategy);
        }
        count
    }

    /// Run the winning strategy for a key
    pub async fn execute(
        &self,
        key: &ServiceKey,
        record: Option<&ErrorRecord>,
        data: Option<Value>,
    ) -> Result<FallbackResult> {
        let error_id = record.map(|record| record.id);

        let Some(strategy) = self.resolve(key) else {
            let error = RecoveryError::NoFallbackAvailable(key.clone());
            self.events.publish(DomainEvent::FallbackFailed {
                key: key.clone(),
                strategy_id: None,
                error_id,
                reason: error.to_string(),
            });
            return Err(error);
        };

        self.events.publish(DomainEvent::FallbackExecuting {
            key: key.clone(),
            strategy_id: strategy.id.clone(),
            fallback_type: strategy.fallback_type,
            error_id,
        });

        let outcome = match strategy.fallback_type {
            FallbackType::Cache => self.from_cache(key, &strategy).await,
            FallbackType::DefaultValue => {
                Ok(strategy.config.default_value.clone().unwrap_or(Value::Null))
            }
            FallbackType::AlternativeService => {
                self.from_alternative(key, &strategy, record, data).await
            }
            FallbackType::QueueForLater => self.queue_for_later(key, &strategy, error_id, data).await,
            FallbackType::GracefulDegradation => Ok(Self::degraded_payload(&strategy)),
        };

        match outcome {
            Ok(value) => {
                log_recovery_operation(
                    "fallback",
                    strategy.fallback_type.as_str(),
                    error_id,
                    "succeeded",
                    Some(&strategy.id),
                );
                self.events.publish(DomainEvent::FallbackSucceeded {
                    key: key.clone(),
                    strategy_id: strategy.id.clone(),
                    fallback_type: strategy.fallback_type,
                    error_id,
                });
                Ok(FallbackResult {
                    strategy_id: strategy.id,
                    fallback_type: strategy.fallback_type,
                    value,
                })
            }
            Err(error) => {
                warn!(
                    strategy_id = %strategy.id,
                    key = %key,
                    error = %error,
                    "Fallback strategy failed"
                );
                self.events.publish(DomainEvent::FallbackFailed {
                    key: key.clone(),
                    strategy_id: Some(strategy.id.clone()),
                    error_id,
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn from_cache(&self, key: &ServiceKey, strategy: &FallbackStrategy) -> Result<Value> {
        let cache_key = strategy
            .config
            .cache_key
            .clone()
            .unwrap_or_else(|| key.storage_id());
        self.writer
            .read::<Value>(namespaces::FALLBACK_CACHE, &cache_key)
            .await?
            .ok_or(RecoveryError::CacheMiss(cache_key))
    }

    async fn from_alternative(
        &self,
        key: &ServiceKey,
        strategy: &FallbackStrategy,
        record: Option<&ErrorRecord>,
        data: Option<Value>,
    ) -> Result<Value> {
        let failed = |reason: String| RecoveryError::FallbackFailed {
            strategy_id: strategy.id.clone(),
            reason,
        };

        let target = strategy
            .config
            .alternative_service
            .as_deref()
            .ok_or_else(|| failed("no alternative_service configured".to_string()))?;
        let service = self
            .alternatives
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| failed(format!("alternative service '{target}' is not registered")))?;

        let request = FallbackRequest {
            key: key.clone(),
            operation: strategy
                .config
                .alternative_operation
                .clone()
                .unwrap_or_else(|| key.operation.clone()),
            error: record.cloned(),
            data,
        };

        service
            .invoke(request)
            .await
            .map_err(|e| failed(format!("alternative service '{target}' failed: {e:#}")))
    }

    async fn queue_for_later(
        &self,
        key: &ServiceKey,
        strategy: &FallbackStrategy,
        error_id: Option<Uuid>,
        payload: Option<Value>,
    ) -> Result<Value> {
        let delay = strategy
            .config
            .retry_after_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_QUEUE_DELAY);
        let queued_at = Utc::now();
        let operation = QueuedOperation {
            id: Uuid::new_v4(),
            key: key.clone(),
            strategy_id: strategy.id.clone(),
            error_id,
            payload,
            queued_at,
            retry_after: queued_at
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1)),
        };

        let stored = self
            .writer
            .write(
                namespaces::QUEUED_OPERATIONS,
                &operation.id.to_string(),
                &operation,
                None,
            )
            .await?;
        if !stored {
            debug!(operation_id = %operation.id, "Queued operation parked until the store recovers");
        }

        Ok(json!({
            "queued": true,
            "operation_id": operation.id,
            "retry_after": operation.retry_after,
        }))
    }

    fn degraded_payload(strategy: &FallbackStrategy) -> Value {
        let level = strategy.config.degradation_level.unwrap_or_default();
        let message = strategy.config.message.clone().unwrap_or_else(|| match level {
            DegradationLevel::Minimal => "Some features may be slower than usual".to_string(),
            DegradationLevel::Partial => "Showing partial data while the service recovers".to_string(),
            DegradationLevel::Full => "Service temporarily unavailable".to_string(),
        });

        let data = match level {
            DegradationLevel::Partial => strategy.config.partial_data.clone().unwrap_or(Value::Null),
            DegradationLevel::Minimal | DegradationLevel::Full => Value::Null,
        };

        json!({
            "degraded": true,
            "level": level,
            "available": level != DegradationLevel::Full,
            "message": message,
            "data": data,
            "disabled_features": strategy.config.disabled_features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FallbackConfig;
    use crate::storage::InMemoryKeyValueStore;

    #[derive(Debug)]
    struct EchoService;

    #[async_trait]
    impl AlternativeService for EchoService {
        async fn invoke(&self, request: FallbackRequest) -> anyhow::Result<Value> {
            Ok(json!({ "operation": request.operation, "data": request.data }))
        }
    }

    #[derive(Debug)]
    struct BrokenService;

    #[async_trait]
    impl AlternativeService for BrokenService {
        async fn invoke(&self, _request: FallbackRequest) -> anyhow::Result<Value> {
            anyhow::bail!("replica offline")
        }
    }

    fn executor() -> FallbackExecutor {
        FallbackExecutor::new(
            Arc::new(PersistenceWriter::new(Arc::new(InMemoryKeyValueStore::new()))),
            EventPublisher::new(64),
        )
    }

    fn key() -> ServiceKey {
        ServiceKey::new("s", "o")
    }

    #[tokio::test]
    async fn test_default_value() {
        let executor = executor();
        executor
            .add_strategy(FallbackStrategy::default_value("s", "o", json!(42)))
            .await
            .unwrap();

        let result = executor.execute(&key(), None, None).await.unwrap();
        assert_eq!(result.value, json!(42));
        assert_eq!(result.fallback_type, FallbackType::DefaultValue);
    }

    #[tokio::test]
    async fn test_no_strategy() {
        let executor = executor();
        let mut events = executor.events.subscribe();
        assert_eq!(
            executor.execute(&key(), None, None).await,
            Err(RecoveryError::NoFallbackAvailable(key()))
        );
        assert!(matches!(
            events.recv().await.unwrap().event,
            DomainEvent::FallbackFailed { strategy_id: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_highest_priority_active_strategy_wins() {
        let executor = executor();
        executor
            .add_strategy(FallbackStrategy::default_value("s", "o", json!("low")).with_id("low").with_priority(1))
            .await
            .unwrap();
        executor
            .add_strategy(
                FallbackStrategy::default_value("s", "o", json!("top"))
                    .with_id("top")
                    .with_priority(10)
                    .inactive(),
            )
            .await
            .unwrap();
        executor
            .add_strategy(FallbackStrategy::default_value("s", "o", json!("mid")).with_id("mid").with_priority(5))
            .await
            .unwrap();

        assert_eq!(executor.resolve(&key()).unwrap().id, "mid");

        // Upsert by id replaces the previous definition
        executor
            .add_strategy(FallbackStrategy::default_value("s", "o", json!("mid2")).with_id("mid").with_priority(5))
            .await
            .unwrap();
        let result = executor.execute(&key(), None, None).await.unwrap();
        assert_eq!(result.value, json!("mid2"));
        assert_eq!(executor.strategies_for(&key()).len(), 3);
    }

    #[tokio::test]
    async fn test_cache_read_through() {
        let executor = executor();
        executor
            .add_strategy(FallbackStrategy::new("s", "o", FallbackType::Cache))
            .await
            .unwrap();

        assert_eq!(
            executor.execute(&key(), None, None).await,
            Err(RecoveryError::CacheMiss(key().storage_id()))
        );

        executor
            .cache_value(&key().storage_id(), json!({"rows": [1, 2]}), None)
            .await
            .unwrap();
        let result = executor.execute(&key(), None, None).await.unwrap();
        assert_eq!(result.value, json!({"rows": [1, 2]}));
    }

    #[tokio::test]
    async fn test_alternative_service() {
        let executor = executor();
        executor.register_alternative("replica", Arc::new(EchoService));
        executor.register_alternative("broken", Arc::new(BrokenService));
        executor
            .add_strategy(FallbackStrategy::new("s", "o", FallbackType::AlternativeService).with_config(
                FallbackConfig {
                    alternative_service: Some("replica".to_string()),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        let result = executor
            .execute(&key(), None, Some(json!({"page": 2})))
            .await
            .unwrap();
        assert_eq!(result.value, json!({"operation": "o", "data": {"page": 2}}));

        executor
            .add_strategy(
                FallbackStrategy::new("s", "o", FallbackType::AlternativeService)
                    .with_id("broken")
                    .with_priority(1)
                    .with_config(FallbackConfig {
                        alternative_service: Some("broken".to_string()),
                        ..Default::default()
                    }),
            )
            .await
            .unwrap();
        let error = executor.execute(&key(), None, None).await.unwrap_err();
        assert!(matches!(error, RecoveryError::FallbackFailed { .. }));
        assert!(error.to_string().contains("replica offline"));
    }

    #[tokio::test]
    async fn test_queue_for_later_acknowledges_and_persists() {
        let executor = executor();
        executor
            .add_strategy(FallbackStrategy::new("s", "o", FallbackType::QueueForLater).with_config(
                FallbackConfig {
                    retry_after_ms: Some(5_000),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        let result = executor
            .execute(&key(), None, Some(json!({"export": "monthly"})))
            .await
            .unwrap();
        assert_eq!(result.value["queued"], json!(true));

        let queued = executor.queued_operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload, Some(json!({"export": "monthly"})));
        assert!(queued[0].retry_after > queued[0].queued_at);

        assert!(executor.complete_queued_operation(queued[0].id).await);
        assert!(executor.queued_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_graceful_degradation_levels() {
        let executor = executor();
        executor
            .add_strategy(FallbackStrategy::new("s", "o", FallbackType::GracefulDegradation).with_config(
                FallbackConfig {
                    degradation_level: Some(DegradationLevel::Partial),
                    partial_data: Some(json!([1, 2, 3])),
                    disabled_features: vec!["export".to_string()],
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let result = executor.execute(&key(), None, None).await.unwrap();
        assert_eq!(result.value["level"], json!("partial"));
        assert_eq!(result.value["available"], json!(true));
        assert_eq!(result.value["data"], json!([1, 2, 3]));

        executor
            .add_strategy(
                FallbackStrategy::new("s", "o", FallbackType::GracefulDegradation).with_config(
                    FallbackConfig {
                        degradation_level: Some(DegradationLevel::Full),
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();
        let result = executor.execute(&key(), None, None).await.unwrap();
        assert_eq!(result.value["available"], json!(false));
        assert_eq!(result.value["message"], json!("Service temporarily unavailable"));
    }
}
