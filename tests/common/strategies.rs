#![allow(dead_code)]

use proptest::prelude::*;
use recovery_core::models::{ErrorCategory, ErrorSeverity};

/// Any of the twelve error categories
pub fn category_strategy() -> impl Strategy<Value = ErrorCategory> {
    prop::sample::select(ErrorCategory::ALL.to_vec())
}

pub fn severity_strategy() -> impl Strategy<Value = ErrorSeverity> {
    prop_oneof![
        Just(ErrorSeverity::Low),
        Just(ErrorSeverity::Medium),
        Just(ErrorSeverity::High),
        Just(ErrorSeverity::Critical),
    ]
}

/// Service or operation names as callers tend to write them
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,23}"
}

/// Free-form error messages, including ones no rule matches
pub fn error_message_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("ECONNREFUSED 127.0.0.1:6379".to_string()),
        Just("HTTP 503 Service Unavailable".to_string()),
        Just("401 Unauthorized".to_string()),
        Just("Too Many Requests".to_string()),
        Just("request timed out after 30s".to_string()),
        "[ -~]{0,80}",
    ]
}
