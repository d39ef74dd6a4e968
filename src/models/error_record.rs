//! # Error Records
//!
//! The persisted unit of the recovery engine. Records are owned by the error
//! store; retry queues and workflows refer to them by id.

use super::classification::{ErrorCategory, ErrorClassification};
use super::ServiceKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Retry budget for retryable records before a strategy is applied
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Lifecycle status of an error record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    Active,
    Retrying,
    Resolved,
    Failed,
    Ignored,
}

impl ErrorStatus {
    /// Terminal states are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorStatus::Resolved | ErrorStatus::Failed | ErrorStatus::Ignored
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Active => "active",
            ErrorStatus::Retrying => "retrying",
            ErrorStatus::Resolved => "resolved",
            ErrorStatus::Failed => "failed",
            ErrorStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error happened
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub service: String,
    pub operation: String,
    pub entity_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_error_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_parent(mut self, parent_error_id: Uuid) -> Self {
        self.parent_error_id = Some(parent_error_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.service.clone(), self.operation.clone())
    }

    /// Both service and operation must be non-blank
    pub fn is_valid(&self) -> bool {
        !self.service.trim().is_empty() && !self.operation.trim().is_empty()
    }
}

/// The failure as observed by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedError {
    pub code: Option<String>,
    pub message: String,
}

impl ObservedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Capture an error value through its `Display` output
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(error.to_string())
    }

    /// Code and message joined, the text classification rules match against
    pub fn match_text(&self) -> String {
        match &self.code {
            Some(code) => format!("{code} {}", self.message),
            None => self.message.clone(),
        }
    }
}

/// A recorded failure and its recovery progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub error_code: String,
    pub error_message: String,
    pub classification: ErrorClassification,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
    pub status: ErrorStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_error_id: Option<Uuid>,
    #[serde(default)]
    pub child_error_ids: Vec<Uuid>,
}

impl ErrorRecord {
    /// New active record. Non-retryable classifications get no retry budget;
    /// retryable ones start with `DEFAULT_MAX_RETRIES` until a strategy says
    /// otherwise.
    pub fn new(
        error: &ObservedError,
        context: ErrorContext,
        classification: ErrorClassification,
    ) -> Self {
        let error_code = error.code.clone().unwrap_or_else(|| {
            format!("{}_ERROR", classification.category.as_str().to_uppercase())
        });
        let max_retries = if classification.is_retryable {
            DEFAULT_MAX_RETRIES
        } else {
            0
        };

        Self {
            id: Uuid::new_v4(),
            error_code,
            error_message: error.message.clone(),
            correlation_id: context.correlation_id.clone(),
            parent_error_id: context.parent_error_id,
            classification,
            context,
            timestamp: Utc::now(),
            status: ErrorStatus::Active,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            resolved_at: None,
            resolution: None,
            child_error_ids: Vec::new(),
        }
    }

    /// Override the retry budget; ignored for non-retryable records
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        if self.classification.is_retryable {
            self.max_retries = max_retries;
        }
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        self.context.service_key()
    }

    pub fn category(&self) -> ErrorCategory {
        self.classification.category
    }

    /// Retry budget left before the record is marked failed
    pub fn retries_remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Query filter for `get_error_records`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecordFilter {
    pub status: Option<ErrorStatus>,
    pub category: Option<ErrorCategory>,
    pub service: Option<String>,
    pub limit: Option<usize>,
}

impl ErrorRecordFilter {
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &ErrorRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self
                .category
                .map_or(true, |category| record.classification.category == category)
            && self
                .service
                .as_deref()
                .map_or(true, |service| record.context.service == service)
    }
}
