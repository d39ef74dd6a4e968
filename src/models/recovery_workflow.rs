//! # Recovery Workflows
//!
//! A workflow is a small directed graph of steps: execution starts at the
//! first step and follows `on_success` / `on_failure` edges by step id.

use super::classification::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStepType {
    Retry,
    Fallback,
    Notification,
    Escalation,
}

impl fmt::Display for RecoveryStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryStepType::Retry => "retry",
            RecoveryStepType::Fallback => "fallback",
            RecoveryStepType::Notification => "notification",
            RecoveryStepType::Escalation => "escalation",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: RecoveryStepType,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Upper bound on how long the engine waits for the step
    pub timeout_ms: u64,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
}

impl RecoveryStep {
    pub fn new(id: impl Into<String>, step_type: RecoveryStepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            parameters: serde_json::Value::Null,
            timeout_ms: 30_000,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn on_success(mut self, step_id: impl Into<String>) -> Self {
        self.on_success = Some(step_id.into());
        self
    }

    pub fn on_failure(mut self, step_id: impl Into<String>) -> Self {
        self.on_failure = Some(step_id.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryWorkflow {
    pub id: String,
    pub name: String,
    pub error_categories: HashSet<ErrorCategory>,
    pub steps: Vec<RecoveryStep>,
    pub is_active: bool,
    pub auto_execute: bool,
    /// Lower values are tried first
    pub priority: i32,
}

impl RecoveryWorkflow {
    pub fn new(id: impl Into<String>, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            error_categories: categories.into_iter().collect(),
            steps: Vec::new(),
            is_active: true,
            auto_execute: true,
            priority: 0,
        }
    }

    pub fn with_step(mut self, step: RecoveryStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn manual(mut self) -> Self {
        self.auto_execute = false;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn handles(&self, category: ErrorCategory) -> bool {
        self.is_active && self.error_categories.contains(&category)
    }

    pub fn step(&self, step_id: &str) -> Option<&RecoveryStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Every `on_success`/`on_failure` edge must name a step of this workflow
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("workflow {} has no steps", self.id));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(format!("workflow {} has duplicate step id {}", self.id, step.id));
            }
        }
        for step in &self.steps {
            for target in [&step.on_success, &step.on_failure].into_iter().flatten() {
                if !seen.contains(target.as_str()) {
                    return Err(format!(
                        "step {} in workflow {} points at unknown step {target}",
                        step.id, self.id
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_dangling_edges() {
        let workflow = RecoveryWorkflow::new("wf", [ErrorCategory::Network])
            .with_step(RecoveryStep::new("retry", RecoveryStepType::Retry).on_failure("missing"));
        assert!(workflow.validate().is_err());

        let workflow = RecoveryWorkflow::new("wf", [ErrorCategory::Network])
            .with_step(RecoveryStep::new("retry", RecoveryStepType::Retry).on_failure("fallback"))
            .with_step(RecoveryStep::new("fallback", RecoveryStepType::Fallback));
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn test_inactive_workflow_handles_nothing() {
        let workflow = RecoveryWorkflow::new("wf", [ErrorCategory::Timeout]).inactive();
        assert!(!workflow.handles(ErrorCategory::Timeout));
    }
}
