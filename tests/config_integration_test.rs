//! Engines built from configuration files

mod common;

use common::RecordingTransport;
use recovery_core::config::ConfigManager;
use recovery_core::models::{ErrorCategory, ErrorContext, ErrorStatus, ObservedError};
use recovery_core::orchestration::RetryDecision;
use recovery_core::resilience::CircuitState;
use recovery_core::{CircuitBreakerError, ConfigurationError, RecoveryEngine};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_config(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn engine_from(file: &NamedTempFile) -> RecoveryEngine {
    let manager = ConfigManager::load_file_only(file.path()).expect("load config");
    RecoveryEngine::builder()
        .config_manager(manager)
        .notification_transport(Arc::new(RecordingTransport::default()))
        .build()
        .expect("engine builds")
}

#[tokio::test]
async fn test_component_breaker_override_applies() {
    let file = write_config(
        r#"
[circuit_breakers]
count_recorded_errors = false

[circuit_breakers.default_config]
failure_threshold = 5

[circuit_breakers.component_configs.billing]
failure_threshold = 2
timeout_ms = 60000
"#,
        ".toml",
    );
    let engine = engine_from(&file);
    assert!(!engine.config().circuit_breakers.count_recorded_errors);

    for _ in 0..2 {
        let _ = engine
            .execute_with_circuit_breaker("billing", "charge", None, || async {
                Err::<(), _>("card processor down")
            })
            .await;
    }
    let rejected = engine
        .execute_with_circuit_breaker("billing", "charge", None, || async { Ok::<_, &str>(()) })
        .await;
    assert!(matches!(rejected, Err(CircuitBreakerError::CircuitOpen { .. })));

    for _ in 0..2 {
        let _ = engine
            .execute_with_circuit_breaker("ledger", "post", None, || async {
                Err::<(), _>("ledger down")
            })
            .await;
    }
    let ledger = engine
        .get_circuit_breaker_states()
        .into_iter()
        .find(|snapshot| snapshot.key.service == "ledger")
        .expect("ledger breaker exists");
    assert_eq!(ledger.state, CircuitState::Closed);
    assert_eq!(ledger.config.failure_threshold, 5);
}

#[tokio::test]
async fn test_recorded_errors_follow_config_flag() {
    let file = write_config(
        r#"
[circuit_breakers]
count_recorded_errors = false
"#,
        ".toml",
    );
    let engine = engine_from(&file);

    engine
        .record_error(ObservedError::new("invalid payload"), ErrorContext::new("api", "ingest"), None)
        .await
        .unwrap();
    assert!(engine.get_circuit_breaker_states().is_empty());
}

#[tokio::test]
async fn test_yaml_category_override_drives_retry_budget() {
    let file = write_config(
        r#"
retry:
  default_strategy:
    type: exponential
    base_delay_ms: 1000
    max_delay_ms: 30000
    multiplier: 2.0
    jitter: false
    max_retries: 5
  category_overrides:
    rate_limit:
      type: fixed
      base_delay_ms: 60000
      max_delay_ms: 60000
      jitter: false
      max_retries: 1
      retryable_categories: [rate_limit]
sweeps:
  retry_interval_ms: 1000
  metrics_interval_ms: 10000
"#,
        ".yaml",
    );
    let engine = engine_from(&file);

    let throttled = engine
        .record_error(
            ObservedError::new("429 Too Many Requests"),
            ErrorContext::new("crm", "sync"),
            None,
        )
        .await
        .unwrap();
    let record = engine.get_error_record(&throttled).unwrap();
    assert_eq!(record.category(), ErrorCategory::RateLimit);
    assert_eq!(record.max_retries, 1);
    assert_eq!(record.status, ErrorStatus::Retrying);

    let network = engine
        .record_error(ObservedError::new("ECONNRESET"), ErrorContext::new("crm", "sync"), None)
        .await
        .unwrap();
    assert_eq!(engine.get_error_record(&network).unwrap().max_retries, 5);
    assert!(matches!(
        engine.schedule_retry(network, None).await.unwrap(),
        RetryDecision::AlreadyScheduled { .. }
    ));
}

#[test]
fn test_missing_file_is_reported() {
    let result = ConfigManager::load_file_only("/nonexistent/recovery.toml");
    assert!(matches!(result, Err(ConfigurationError::ConfigFileNotFound { .. })));
}

#[test]
fn test_invalid_thresholds_are_rejected() {
    let file = write_config(
        r#"
[health]
degraded_error_rate = 0.5
unhealthy_error_rate = 0.2
"#,
        ".toml",
    );
    assert!(ConfigManager::load_file_only(file.path()).is_err());

    let file = write_config(
        r#"
[sweeps]
retry_interval_ms = 0
"#,
        ".toml",
    );
    assert!(ConfigManager::load_file_only(file.path()).is_err());
}
