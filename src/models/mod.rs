//! # Data Model
//!
//! Plain serde types shared by every component: classifications, error
//! records, retry strategies, fallback strategies, recovery workflows, notifications and
//! metrics snapshots.

pub mod classification;
pub mod error_record;
pub mod fallback_strategy;
pub mod metrics;
pub mod notification;
pub mod recovery_workflow;
pub mod retry_strategy;
pub mod service_key;

pub use classification::{ErrorCategory, ErrorClassification, ErrorSeverity};
pub use error_record::{
    ErrorContext, ErrorRecord, ErrorRecordFilter, ErrorStatus, ObservedError, DEFAULT_MAX_RETRIES,
};
pub use fallback_strategy::{DegradationLevel, FallbackConfig, FallbackStrategy, FallbackType};
pub use metrics::{ErrorMetrics, HealthDetails, HealthState, HealthStatus};
pub use notification::{
    ErrorNotification, NotificationChannel, NotificationPriority, NotificationStatus,
};
pub use recovery_workflow::{RecoveryStep, RecoveryStepType, RecoveryWorkflow};
pub use retry_strategy::{CustomDelay, RetryStrategy, RetryStrategyType};
pub use service_key::ServiceKey;
