//! # Recovery Orchestration
//!
//! Everything that happens after a failure is observed.
//!
//! ## Core Components
//!
//! - **RecoveryEngine**: process-wide facade; records errors and drives the
//!   components below in a fixed order
//! - **ErrorClassifier**: ordered, data-driven rules mapping error text to a
//!   category and handling profile
//! - **ErrorRecordStore**: owner of every error record, one lock per record
//! - **RetryScheduler**: backoff computation and per-(service, operation)
//!   retry queues
//! - **FallbackExecutor**: substitute results when recovery is not possible
//! - **WorkflowEngine**: multi-step recovery procedures per error category
//! - **NotificationQueue**: alerts and escalation, delivered by a transport
//! - **MetricsAggregator**: rollups and health status
//! - **RecoverySweeper**: the two background sweeps

pub mod backoff_calculator;
pub mod core;
pub mod error_classifier;
pub mod error_store;
pub mod fallback_executor;
pub mod metrics_aggregator;
pub mod notification_queue;
pub mod retry_scheduler;
pub mod sweeper;
pub mod workflow_engine;

pub use backoff_calculator::{BackoffCalculator, BackoffResult, BackoffType};
pub use core::{RecordedFailure, RecoveryEngine, RecoveryEngineBuilder, RestoreReport};
pub use error_classifier::{ClassificationRule, ErrorClassifier, RuleBasedErrorClassifier};
pub use error_store::ErrorRecordStore;
pub use fallback_executor::{
    AlternativeService, FallbackExecutor, FallbackRequest, FallbackResult, QueuedOperation,
};
pub use metrics_aggregator::{assess_health, MetricsAggregator};
pub use notification_queue::{
    DeliveryReport, LoggingTransport, NotificationQueue, NotificationTransport,
};
pub use retry_scheduler::{RetryDecision, RetryScheduler};
pub use sweeper::{LongSweepReport, RecoverySweeper, ShortSweepReport, SweepTargets};
pub use workflow_engine::{ExecutionOutcome, RecoveryExecution, StepOutcome, WorkflowEngine};
