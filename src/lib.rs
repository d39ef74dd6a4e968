#![allow(clippy::doc_markdown)] // Allow technical terms like DashMap, KeyValueStore in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Recovery Core
//!
//! Resilience and fault-recovery engine for services that call unreliable
//! dependencies.
//!
//! ## Overview
//!
//! Every failure handed to the engine is classified, persisted and fed to a
//! per-(service, operation) circuit breaker. From there the engine decides
//! whether to schedule a retry, runs the recovery workflow registered for the
//! error category, and queues notifications or escalations. Callers can also
//! wrap real calls in a circuit breaker and ask for a fallback result when an
//! operation cannot succeed.
//!
//! ## Module Organization
//!
//! - [`models`] - Error records, classifications, strategies, workflows
//! - [`resilience`] - Circuit breakers and their manager
//! - [`orchestration`] - The recovery engine and its components
//! - [`storage`] - Key/value persistence boundary and write buffering
//! - [`events`] - Domain events published on a broadcast channel
//! - [`config`] - Layered configuration (defaults, file, environment)
//! - [`logging`] - Structured logging setup and helpers
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recovery_core::models::{ErrorContext, ObservedError};
//! use recovery_core::orchestration::RecoveryEngine;
//!
//! # async fn example() -> recovery_core::Result<()> {
//! let engine = RecoveryEngine::builder().build()?;
//! engine.start().await;
//!
//! let error_id = engine
//!     .record_error(
//!         ObservedError::new("ECONNREFUSED"),
//!         ErrorContext::new("sync-engine", "sync_data"),
//!         None,
//!     )
//!     .await?;
//!
//! let record = engine.get_error_record(&error_id);
//! println!("{:?}", record.map(|r| r.status));
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod storage;

pub use config::{ConfigManager, ConfigurationError, RecoveryConfig};
pub use error::{CircuitBreakerError, RecoveryError, Result};
pub use events::{DomainEvent, EventPublisher, PublishedEvent};
pub use models::{
    ErrorCategory, ErrorClassification, ErrorContext, ErrorRecord, ErrorRecordFilter,
    ErrorSeverity, ErrorStatus, FallbackStrategy, FallbackType, HealthState, HealthStatus,
    ObservedError, RecoveryStep, RecoveryStepType, RecoveryWorkflow, RetryStrategy, ServiceKey,
};
pub use orchestration::{RecoveryEngine, RecoveryEngineBuilder};
pub use resilience::{CircuitBreakerConfig, CircuitState};
pub use storage::{InMemoryKeyValueStore, KeyValueStore};
