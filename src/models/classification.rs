//! # Error Classification Model
//!
//! Category, severity and handling flags attached to every recorded error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Authorization,
    Validation,
    RateLimit,
    Quota,
    Timeout,
    ServerError,
    ClientError,
    System,
    Integration,
    DataQuality,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 12] = [
        ErrorCategory::Network,
        ErrorCategory::Authentication,
        ErrorCategory::Authorization,
        ErrorCategory::Validation,
        ErrorCategory::RateLimit,
        ErrorCategory::Quota,
        ErrorCategory::Timeout,
        ErrorCategory::ServerError,
        ErrorCategory::ClientError,
        ErrorCategory::System,
        ErrorCategory::Integration,
        ErrorCategory::DataQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Quota => "quota",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::System => "system",
            ErrorCategory::Integration => "integration",
            ErrorCategory::DataQuality => "data_quality",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }

    /// High and critical errors trigger an immediate notification
    pub fn requires_notification(&self) -> bool {
        *self >= ErrorSeverity::High
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying an error.
///
/// Immutable once assigned to a record, except for `escalation_level` which
/// only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub is_retryable: bool,
    pub is_temporary: bool,
    pub requires_user_action: bool,
    pub escalation_level: u32,
}

impl ErrorClassification {
    /// Default handling profile for a category
    pub fn for_category(category: ErrorCategory) -> Self {
        let (severity, is_retryable, is_temporary, requires_user_action) = match category {
            ErrorCategory::Network => (ErrorSeverity::Medium, true, true, false),
            ErrorCategory::Authentication => (ErrorSeverity::High, false, false, true),
            ErrorCategory::Authorization => (ErrorSeverity::High, false, false, true),
            ErrorCategory::Validation => (ErrorSeverity::Low, false, false, true),
            ErrorCategory::RateLimit => (ErrorSeverity::Medium, true, true, false),
            ErrorCategory::Quota => (ErrorSeverity::High, false, true, true),
            ErrorCategory::Timeout => (ErrorSeverity::Medium, true, true, false),
            ErrorCategory::ServerError => (ErrorSeverity::High, true, true, false),
            ErrorCategory::ClientError => (ErrorSeverity::Medium, false, false, true),
            ErrorCategory::System => (ErrorSeverity::Medium, true, true, false),
            ErrorCategory::Integration => (ErrorSeverity::Medium, true, true, false),
            ErrorCategory::DataQuality => (ErrorSeverity::Medium, false, false, true),
        };

        Self {
            category,
            severity,
            is_retryable,
            is_temporary,
            requires_user_action,
            escalation_level: 1,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Raise the escalation level by one and return the new level
    pub fn escalate(&mut self) -> u32 {
        self.escalation_level = self.escalation_level.saturating_add(1);
        self.escalation_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_action_categories_are_not_retryable() {
        for category in [ErrorCategory::Authentication, ErrorCategory::Validation] {
            let classification = ErrorClassification::for_category(category);
            assert!(!classification.is_retryable, "{category} must not retry");
            assert!(classification.requires_user_action);
        }
    }

    #[test]
    fn test_transient_categories_are_retryable() {
        for category in [
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::RateLimit,
            ErrorCategory::ServerError,
            ErrorCategory::System,
        ] {
            assert!(ErrorClassification::for_category(category).is_retryable);
        }
    }

    #[test]
    fn test_escalation_is_monotonic() {
        let mut classification = ErrorClassification::for_category(ErrorCategory::System);
        assert_eq!(classification.escalation_level, 1);
        assert_eq!(classification.escalate(), 2);
        assert_eq!(classification.escalate(), 3);
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&ErrorCategory::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        for category in ErrorCategory::ALL {
            let encoded = serde_json::to_value(category).unwrap();
            assert_eq!(encoded, serde_json::json!(category.as_str()));
        }
    }
}
