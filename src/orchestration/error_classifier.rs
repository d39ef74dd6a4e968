//! # Error Classification
//!
//! Turns an observed failure plus its context into an [`ErrorClassification`].
//!
//! Classification is an ordered list of rules, each pairing a
//! case-insensitive pattern with a category. The first rule whose pattern
//! matches the error's code and message wins; when nothing matches the error
//! is treated as a retryable `system` error of medium severity. Classification
//! never fails.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ ObservedError   │────▶│ ordered rules   │────▶│ Classification  │
//! │ + ErrorContext  │     │ (first match)   │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use recovery_core::models::{ErrorCategory, ErrorContext, ObservedError};
//! use recovery_core::orchestration::error_classifier::{ErrorClassifier, RuleBasedErrorClassifier};
//!
//! let classifier = RuleBasedErrorClassifier::new();
//! let context = ErrorContext::new("sync-engine", "sync_data");
//! let classification = classifier.classify(&ObservedError::new("ECONNREFUSED"), &context);
//!
//! assert_eq!(classification.category, ErrorCategory::Network);
//! assert!(classification.is_retryable);
//! ```

use crate::models::{ErrorCategory, ErrorClassification, ErrorContext, ErrorSeverity, ObservedError};
use regex::{Regex, RegexBuilder};
use std::fmt;
use tracing::{trace, warn};

/// Context metadata key that forces a severity on the classification
pub const SEVERITY_METADATA_KEY: &str = "severity";

/// Strategy for classifying errors
pub trait ErrorClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, error: &ObservedError, context: &ErrorContext) -> ErrorClassification;
}

/// One pattern/category pair
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub name: String,
    pattern: Regex,
    pub category: ErrorCategory,
    /// Overrides the category's default severity when set
    pub severity: Option<ErrorSeverity>,
}

impl ClassificationRule {
    /// Build a rule from a case-insensitive pattern
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        category: ErrorCategory,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            category,
            severity: None,
        })
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn classification(&self) -> ErrorClassification {
        let classification = ErrorClassification::for_category(self.category);
        match self.severity {
            Some(severity) => classification.with_severity(severity),
            None => classification,
        }
    }
}

/// Built-in rule table, in match order
const DEFAULT_RULES: &[(&str, &str, ErrorCategory)] = &[
    (
        "network",
        r"ECONNREFUSED|ENOTFOUND|ECONNRESET|ETIMEDOUT|EHOSTUNREACH|EPIPE|socket hang up|network|connection (refused|reset|closed)|dns",
        ErrorCategory::Network,
    ),
    (
        "authentication",
        r"unauthori[sz]ed|\b401\b|authentication|unauthenticated|invalid (token|credentials|api key)|token expired",
        ErrorCategory::Authentication,
    ),
    (
        "authorization",
        r"forbidden|\b403\b|permission denied|access denied|not authori[sz]ed|insufficient (permissions|scope)",
        ErrorCategory::Authorization,
    ),
    (
        "rate_limit",
        r"rate.?limit|too many requests|\b429\b|throttl",
        ErrorCategory::RateLimit,
    ),
    (
        "quota",
        r"quota|usage limit|limit exceeded",
        ErrorCategory::Quota,
    ),
    (
        "server_error",
        r"\b50[0-9]\b|internal server error|service unavailable|bad gateway|server error",
        ErrorCategory::ServerError,
    ),
    (
        "timeout",
        r"timed? ?out|timeout|deadline exceeded",
        ErrorCategory::Timeout,
    ),
    (
        "validation",
        r"validation|invalid|required field|is required|must be|malformed|\b400\b|\b422\b",
        ErrorCategory::Validation,
    ),
    (
        "data_quality",
        r"data quality|corrupt|checksum|schema mismatch|inconsistent data",
        ErrorCategory::DataQuality,
    ),
    (
        "integration",
        r"integration|webhook|third.party|upstream",
        ErrorCategory::Integration,
    ),
    (
        "client_error",
        r"\b4[0-9]{2}\b|not found|bad request|conflict",
        ErrorCategory::ClientError,
    ),
];

/// Ordered, data-driven classifier
#[derive(Debug, Clone)]
pub struct RuleBasedErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for RuleBasedErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedErrorClassifier {
    /// Classifier with the built-in rule table
    pub fn new() -> Self {
        Self::with_rules(Self::default_rules())
    }

    /// Classifier with a caller-supplied rule list, matched in order
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn default_rules() -> Vec<ClassificationRule> {
        DEFAULT_RULES
            .iter()
            .filter_map(|(name, pattern, category)| {
                ClassificationRule::new(*name, pattern, *category)
                    .map_err(|e| warn!(rule = %name, error = %e, "Skipping invalid classification rule"))
                    .ok()
            })
            .collect()
    }

    /// Add a rule ahead of every existing one
    pub fn prepend_rule(&mut self, rule: ClassificationRule) {
        self.rules.insert(0, rule);
    }

    /// Add a rule after every existing one
    pub fn push_rule(&mut self, rule: ClassificationRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Name of the first rule matching the error, if any
    pub fn matching_rule(&self, error: &ObservedError) -> Option<&ClassificationRule> {
        let text = error.match_text();
        self.rules.iter().find(|rule| rule.matches(&text))
    }
}

impl ErrorClassifier for RuleBasedErrorClassifier {
    fn classify(&self, error: &ObservedError, context: &ErrorContext) -> ErrorClassification {
        let classification = match self.matching_rule(error) {
            Some(rule) => {
                trace!(rule = %rule.name, category = %rule.category, "Classification rule matched");
                rule.classification()
            }
            None => ErrorClassification::for_category(ErrorCategory::System),
        };

        // Callers may pin severity through context metadata
        match context
            .metadata
            .get(SEVERITY_METADATA_KEY)
            .and_then(|value| serde_json::from_value::<ErrorSeverity>(value.clone()).ok())
        {
            Some(severity) => classification.with_severity(severity),
            None => classification,
        }
    }
}
