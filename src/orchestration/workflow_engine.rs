//! # Recovery Workflow Engine
//!
//! Runs at most one workflow per error: the active, auto-executing workflow
//! with the lowest priority value whose categories include the record's.
//!
//! Execution starts at the first step. A successful step continues at its
//! `on_success` target or ends the run. A failed step jumps once to its
//! `on_failure` target and the run ends after that step; without a target
//! the run aborts. Each step is bounded by its timeout.
//!
//! Step failures never escape [`WorkflowEngine::execute_for_record`]; they
//! are reported in the returned [`RecoveryExecution`] and as events.

use crate::error::{RecoveryError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::logging::log_recovery_operation;
use crate::models::{
    ErrorRecord, RecoveryStep, RecoveryStepType, RecoveryWorkflow, RetryStrategy, ServiceKey,
};
use crate::orchestration::error_store::ErrorRecordStore;
use crate::orchestration::fallback_executor::FallbackExecutor;
use crate::orchestration::notification_queue::NotificationQueue;
use crate::orchestration::retry_scheduler::RetryScheduler;
use crate::storage::{namespaces, PersistenceWriter};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of running one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub step_type: RecoveryStepType,
    pub succeeded: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Every step that ran succeeded
    Completed,
    /// A step failed and its `on_failure` step succeeded
    Recovered { failed_step: String },
    /// A step failed with nowhere to go, or the `on_failure` step failed too
    Aborted { step_id: String, reason: String },
}

/// Report of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryExecution {
    pub workflow_id: String,
    pub error_id: Uuid,
    pub steps: Vec<StepOutcome>,
    pub outcome: ExecutionOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RecoveryExecution {
    pub fn steps_run(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.step_id.clone()).collect()
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, ExecutionOutcome::Aborted { .. })
    }
}

#[derive(Debug)]
pub struct WorkflowEngine {
    workflows: DashMap<String, RecoveryWorkflow>,
    store: Arc<ErrorRecordStore>,
    scheduler: Arc<RetryScheduler>,
    fallback: Arc<FallbackExecutor>,
    notifications: Arc<NotificationQueue>,
    writer: Arc<PersistenceWriter>,
    events: EventPublisher,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<ErrorRecordStore>,
        scheduler: Arc<RetryScheduler>,
        fallback: Arc<FallbackExecutor>,
        notifications: Arc<NotificationQueue>,
        writer: Arc<PersistenceWriter>,
        events: EventPublisher,
    ) -> Self {
        Self {
            workflows: DashMap::new(),
            store,
            scheduler,
            fallback,
            notifications,
            writer,
            events,
        }
    }

    /// Insert or replace a workflow by id and persist it
    pub async fn add_workflow(&self, workflow: RecoveryWorkflow) -> Result<()> {
        workflow.validate().map_err(RecoveryError::InvalidContext)?;
        self.writer
            .write(namespaces::RECOVERY_WORKFLOWS, &workflow.id, &workflow, None)
            .await?;
        info!(
            workflow_id = %workflow.id,
            steps = workflow.steps.len(),
            priority = workflow.priority,
            "Recovery workflow registered"
        );
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub async fn remove_workflow(&self, workflow_id: &str) -> bool {
        let removed = self.workflows.remove(workflow_id).is_some();
        if removed {
            self.writer
                .delete(namespaces::RECOVERY_WORKFLOWS, workflow_id)
                .await;
        }
        removed
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<RecoveryWorkflow> {
        self.workflows.get(workflow_id).map(|entry| entry.clone())
    }

    pub fn workflows(&self) -> Vec<RecoveryWorkflow> {
        let mut workflows: Vec<RecoveryWorkflow> =
            self.workflows.iter().map(|entry| entry.value().clone()).collect();
        workflows.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        workflows
    }

    /// The workflow that would run automatically for a record
    pub fn select(&self, record: &ErrorRecord) -> Option<RecoveryWorkflow> {
        self.workflows()
            .into_iter()
            .filter(|workflow| workflow.handles(record.category()))
            .find(|workflow| workflow.auto_execute)
    }

    /// Reinstate workflows loaded from the store
    pub fn restore(&self, workflows: Vec<RecoveryWorkflow>) -> usize {
        let mut restored = 0;
        for workflow in workflows {
            if let Err(reason) = workflow.validate() {
                warn!(workflow_id = %workflow.id, reason = %reason, "Skipping invalid stored workflow");
                continue;
            }
            self.workflows.insert(workflow.id.clone(), workflow);
            restored += 1;
        }
        restored
    }

    /// Run the selected workflow for a record, if any
    pub async fn execute_for_record(&self, error_id: Uuid) -> Result<Option<RecoveryExecution>> {
        let record = self
            .store
            .get(&error_id)
            .ok_or(RecoveryError::RecordNotFound(error_id))?;

        let Some(workflow) = self.select(&record) else {
            debug!(error_id = %error_id, category = %record.category(), "No recovery workflow applies");
            return Ok(None);
        };
        Ok(Some(self.run(&workflow, &record).await))
    }

    /// Run a specific workflow against a record, ignoring `auto_execute`
    pub async fn execute_workflow(&self, workflow_id: &str, error_id: Uuid) -> Result<RecoveryExecution> {
        let workflow = self
            .workflow(workflow_id)
            .ok_or_else(|| RecoveryError::WorkflowNotFound(workflow_id.to_string()))?;
        let record = self
            .store
            .get(&error_id)
            .ok_or(RecoveryError::RecordNotFound(error_id))?;
        Ok(self.run(&workflow, &record).await)
    }

    async fn run(&self, workflow: &RecoveryWorkflow, record: &ErrorRecord) -> RecoveryExecution {
        let started_at = Utc::now();
        let error_id = record.id;
        info!(workflow_id = %workflow.id, error_id = %error_id, "🚑 Recovery workflow started");
        self.events.publish(DomainEvent::RecoveryStarted {
            error_id,
            workflow_id: workflow.id.clone(),
        });

        let mut steps = Vec::new();
        let mut visited = HashSet::new();
        let mut failed_step: Option<String> = None;
        let mut current = workflow.steps.first();

        let outcome = loop {
            let Some(step) = current else {
                break match failed_step {
                    Some(failed_step) => ExecutionOutcome::Recovered { failed_step },
                    None => ExecutionOutcome::Completed,
                };
            };
            if !visited.insert(step.id.clone()) {
                warn!(workflow_id = %workflow.id, step_id = %step.id, "Step revisited, ending workflow");
                current = None;
                continue;
            }

            let outcome = self.run_step(workflow, step, record).await;
            let succeeded = outcome.succeeded;
            let reason = outcome.error.clone().unwrap_or_default();
            steps.push(outcome);

            if succeeded {
                self.events.publish(DomainEvent::RecoveryStepCompleted {
                    error_id,
                    workflow_id: workflow.id.clone(),
                    step_id: step.id.clone(),
                });
                current = match failed_step {
                    // The on_failure step is a one-shot jump
                    Some(_) => None,
                    None => step.on_success.as_deref().and_then(|id| workflow.step(id)),
                };
                continue;
            }

            self.events.publish(DomainEvent::RecoveryStepFailed {
                error_id,
                workflow_id: workflow.id.clone(),
                step_id: step.id.clone(),
                reason: reason.clone(),
            });

            let jump = step.on_failure.as_deref().and_then(|id| workflow.step(id));
            match (failed_step.is_some(), jump) {
                (false, Some(next)) => {
                    failed_step = Some(step.id.clone());
                    current = Some(next);
                }
                _ => {
                    break ExecutionOutcome::Aborted {
                        step_id: step.id.clone(),
                        reason,
                    }
                }
            }
        };

        let execution = RecoveryExecution {
            workflow_id: workflow.id.clone(),
            error_id,
            steps,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };

        match &execution.outcome {
            ExecutionOutcome::Aborted { step_id, reason } => {
                log_recovery_operation("workflow", &workflow.id, Some(error_id), "aborted", Some(reason));
                self.events.publish(DomainEvent::RecoveryAborted {
                    error_id,
                    workflow_id: workflow.id.clone(),
                    step_id: step_id.clone(),
                    reason: reason.clone(),
                });
            }
            ExecutionOutcome::Completed | ExecutionOutcome::Recovered { .. } => {
                log_recovery_operation("workflow", &workflow.id, Some(error_id), "completed", None);
                self.events.publish(DomainEvent::RecoveryCompleted {
                    error_id,
                    workflow_id: workflow.id.clone(),
                    steps_run: execution.steps_run(),
                });
            }
        }
        execution
    }

    async fn run_step(
        &self,
        workflow: &RecoveryWorkflow,
        step: &RecoveryStep,
        record: &ErrorRecord,
    ) -> StepOutcome {
        let started = Instant::now();
        debug!(workflow_id = %workflow.id, step_id = %step.id, step_type = %step.step_type, "Running recovery step");

        let result = match tokio::time::timeout(step.timeout(), self.dispatch(step, record)).await {
            Ok(result) => result,
            Err(_) => Err(RecoveryError::StepTimeout {
                step_id: step.id.clone(),
                timeout: step.timeout(),
            }),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(output) => StepOutcome {
                step_id: step.id.clone(),
                step_type: step.step_type,
                succeeded: true,
                output: Some(output),
                error: None,
                duration_ms,
            },
            Err(error) => {
                warn!(
                    workflow_id = %workflow.id,
                    step_id = %step.id,
                    error = %error,
                    "Recovery step failed"
                );
                StepOutcome {
                    step_id: step.id.clone(),
                    step_type: step.step_type,
                    succeeded: false,
                    output: None,
                    error: Some(error.to_string()),
                    duration_ms,
                }
            }
        }
    }

    async fn dispatch(&self, step: &RecoveryStep, record: &ErrorRecord) -> Result<Value> {
        let step_failed = |reason: String| RecoveryError::StepFailed {
            step_id: step.id.clone(),
            reason,
        };

        match step.step_type {
            RecoveryStepType::Retry => {
                let strategy = match step.parameters.get("strategy") {
                    Some(value) => Some(
                        serde_json::from_value::<RetryStrategy>(value.clone())
                            .map_err(|e| step_failed(format!("invalid retry strategy: {e}")))?,
                    ),
                    None => None,
                };
                let decision = self
                    .scheduler
                    .schedule_retry(record.id, strategy.as_ref())
                    .await?;
                if decision.is_pending() {
                    Ok(serde_json::to_value(&decision)?)
                } else {
                    Err(step_failed(format!("retry not scheduled: {decision:?}")))
                }
            }
            RecoveryStepType::Fallback => {
                let param = |name: &str| {
                    step.parameters
                        .get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                let key = ServiceKey::new(
                    param("service").unwrap_or_else(|| record.context.service.clone()),
                    param("operation").unwrap_or_else(|| record.context.operation.clone()),
                );
                let data = step.parameters.get("data").cloned();
                let result = self.fallback.execute(&key, Some(record), data).await?;
                Ok(serde_json::to_value(&result)?)
            }
            RecoveryStepType::Notification => {
                let notification = self.notifications.queue_notification(record);
                Ok(json!({ "notification_id": notification.id }))
            }
            RecoveryStepType::Escalation => {
                let level = self.notifications.escalate(record.id).await?;
                Ok(json!({ "escalation_level": level }))
            }
        }
    }
}
