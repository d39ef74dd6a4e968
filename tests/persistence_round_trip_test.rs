//! State written through the key/value store survives an engine restart

mod common;

use common::*;
use recovery_core::models::{
    DegradationLevel, ErrorCategory, ErrorContext, ErrorStatus, FallbackConfig, FallbackStrategy,
    FallbackType, ObservedError, RecoveryStep, RecoveryStepType, RecoveryWorkflow, RetryStrategy,
};
use recovery_core::resilience::CircuitState;
use recovery_core::storage::namespaces;
use recovery_core::storage::KeyValueStore;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_fallback_strategy_round_trip() {
    let TestEngine { engine, store, .. } = test_engine();
    let strategy = FallbackStrategy::new("catalog", "search", FallbackType::GracefulDegradation)
        .with_priority(7)
        .with_config(FallbackConfig {
            degradation_level: Some(DegradationLevel::Partial),
            message: Some("Search results may be stale".to_string()),
            partial_data: Some(json!({"items": []})),
            disabled_features: vec!["facets".to_string()],
            ..Default::default()
        });
    engine.add_fallback_strategy(strategy.clone()).await.unwrap();

    let stored = store
        .get(namespaces::FALLBACK_STRATEGIES, &strategy.id)
        .await
        .unwrap()
        .expect("strategy persisted");
    assert_eq!(stored["type"], "graceful_degradation");

    let TestEngine { engine: restarted, .. } = TestEngineBuilder::new().store(store).build();
    let report = restarted.restore().await.unwrap();
    assert_eq!(report.fallback_strategies, 1);
    assert_eq!(
        restarted.fallback_executor().strategy(&strategy.id),
        Some(strategy)
    );

    let result = restarted
        .execute_fallback("catalog", "search", None, None)
        .await
        .unwrap();
    assert_eq!(result.value["level"], "partial");
    assert_eq!(result.value["data"], json!({"items": []}));
}

#[tokio::test]
async fn test_records_restore_and_requeue_retries() {
    let TestEngine { engine, store, .. } = TestEngineBuilder::new()
        .retry_strategy(RetryStrategy::fixed(Duration::from_millis(1)).with_jitter(false))
        .build();
    let retrying = engine
        .record_error(ObservedError::new("ECONNRESET"), ErrorContext::new("sync", "pull"), None)
        .await
        .unwrap();
    let rejected = engine
        .record_error(
            ObservedError::new("field 'email' is required"),
            ErrorContext::new("signup", "create_user").with_user("u-42"),
            None,
        )
        .await
        .unwrap();
    let original = engine.get_error_record(&rejected).unwrap();

    let TestEngine { engine: restarted, .. } = TestEngineBuilder::new()
        .retry_strategy(RetryStrategy::fixed(Duration::from_millis(1)).with_jitter(false))
        .store(store)
        .build();
    let report = restarted.restore().await.unwrap();
    assert_eq!(report.error_records, 2);
    assert_eq!(report.requeued_retries, 1);
    assert_eq!(restarted.get_error_record(&rejected), Some(original));

    tokio::time::sleep(SHORT).await;
    let sweep = restarted.sweeper().targets().run_short_sweep().await;
    assert_eq!(sweep.ready_retries, vec![retrying]);
    assert_eq!(
        restarted.get_error_record(&retrying).unwrap().retry_count,
        1
    );
}

#[tokio::test]
async fn test_breaker_and_workflow_round_trip() {
    let TestEngine { engine, store, .. } = test_engine();
    engine
        .add_recovery_workflow(
            RecoveryWorkflow::new("timeouts", [ErrorCategory::Timeout])
                .with_step(RecoveryStep::new("notify", RecoveryStepType::Notification)),
        )
        .await
        .unwrap();
    engine
        .execute_with_circuit_breaker("ledger", "post", None, || async { Ok::<_, ()>(()) })
        .await
        .unwrap();
    assert!(engine.force_open("ledger", "post").await);

    let TestEngine { engine: restarted, .. } = TestEngineBuilder::new().store(store).build();
    let report = restarted.restore().await.unwrap();
    assert_eq!(report.circuit_breakers, 1);
    assert_eq!(report.recovery_workflows, 1);

    let states = restarted.get_circuit_breaker_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].state, CircuitState::Open);
    assert!(restarted.workflow_engine().workflow("timeouts").is_some());
}

#[tokio::test]
async fn test_writes_during_outage_are_flushed_later() {
    let TestEngine { engine, store, .. } = test_engine();
    store.set_unavailable(true);

    let error_id = engine
        .record_error(ObservedError::new("invalid payload"), ErrorContext::new("api", "ingest"), None)
        .await
        .expect("recording survives a store outage");
    assert!(engine.get_error_record(&error_id).is_some());
    assert!(engine.persistence().pending_count() > 0);

    let report = engine.sweeper().targets().run_short_sweep().await;
    assert_eq!(report.flushed_writes, 0);

    store.set_unavailable(false);
    let report = engine.sweeper().targets().run_short_sweep().await;
    assert!(report.flushed_writes > 0);
    assert_eq!(engine.persistence().pending_count(), 0);

    let stored = store
        .get(namespaces::ERROR_RECORDS, &error_id.to_string())
        .await
        .unwrap()
        .expect("record flushed");
    assert_eq!(stored["status"], "active");
}

#[tokio::test]
async fn test_resolution_is_persisted() {
    let TestEngine { engine, store, .. } = test_engine();
    let error_id = engine
        .record_error(ObservedError::new("ETIMEDOUT"), ErrorContext::new("svc", "op"), None)
        .await
        .unwrap();
    assert!(engine.resolve_error(error_id, "upstream recovered").await);

    let TestEngine { engine: restarted, .. } = TestEngineBuilder::new().store(store).build();
    let report = restarted.restore().await.unwrap();
    assert_eq!(report.requeued_retries, 0);

    let record = restarted.get_error_record(&error_id).unwrap();
    assert_eq!(record.status, ErrorStatus::Resolved);
    assert_eq!(record.resolution.as_deref(), Some("upstream recovered"));
    assert!(record.resolved_at.is_some());
}

#[tokio::test]
async fn test_queued_operations_survive_restart() {
    let TestEngine { engine, store, .. } = test_engine();
    engine
        .add_fallback_strategy(
            FallbackStrategy::new("mailer", "send", FallbackType::QueueForLater).with_config(
                FallbackConfig {
                    retry_after_ms: Some(30_000),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();
    let result = engine
        .execute_fallback("mailer", "send", None, Some(json!({"to": "ops@example.com"})))
        .await
        .unwrap();
    assert_eq!(result.value["queued"], true);

    let TestEngine { engine: restarted, .. } = TestEngineBuilder::new().store(store).build();
    let queued = restarted.queued_operations().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].payload, Some(json!({"to": "ops@example.com"})));
    assert!(restarted
        .fallback_executor()
        .complete_queued_operation(queued[0].id)
        .await);
    assert!(restarted.queued_operations().await.unwrap().is_empty());
}
