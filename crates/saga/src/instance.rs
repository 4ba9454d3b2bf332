//! Saga instance state.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::definition::SagaContext;
use crate::events::SagaEvent;
use crate::state::SagaStatus;

/// A compensation action that returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    /// The step whose compensation failed.
    pub step: String,
    /// Error message from the compensation action.
    pub error: String,
}

/// A running or finished execution of a saga definition.
///
/// Instances are owned by the orchestrator; callers only ever receive
/// cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    id: SagaId,
    saga_type: String,
    context: SagaContext,
    status: SagaStatus,
    current_step_index: usize,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    failed_step: Option<String>,
    error: Option<String>,
    compensation_failures: Vec<CompensationFailure>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// Creates a new instance in the `Started` status.
    pub fn new(id: SagaId, saga_type: impl Into<String>, context: SagaContext) -> Self {
        let now = Utc::now();
        Self {
            id,
            saga_type: saga_type.into(),
            context,
            status: SagaStatus::Started,
            current_step_index: 0,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            failed_step: None,
            error: None,
            compensation_failures: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Applies a lifecycle event to this instance.
    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::StepStarted(data) => {
                self.status = SagaStatus::InProgress;
                self.current_step_index = data.step_index;
            }
            SagaEvent::StepCompleted(data) => {
                // Shallow merge: top-level keys from the update win.
                self.context.extend(data.update);
                self.completed_steps.push(data.step_name);
                self.current_step_index += 1;
            }
            SagaEvent::StepFailed(data) => {
                self.status = SagaStatus::Failed;
                self.failed_step = Some(data.step_name);
                self.error = Some(data.error);
            }
            SagaEvent::CompensationStarted => {
                self.status = SagaStatus::Compensating;
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensated_steps.push(data.step_name);
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.compensation_failures.push(CompensationFailure {
                    step: data.step_name,
                    error: data.error,
                });
            }
            SagaEvent::SagaCompleted(data) => {
                self.status = SagaStatus::Completed;
                self.completed_at = Some(data.finished_at);
            }
            SagaEvent::SagaCompensated(data) => {
                self.status = SagaStatus::Compensated;
                self.completed_at = Some(data.finished_at);
            }
        }
        self.updated_at = Utc::now();
    }
}

// Query methods
impl SagaInstance {
    /// Returns the saga instance ID.
    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Returns the saga type.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the accumulated context.
    pub fn context(&self) -> &SagaContext {
        &self.context
    }

    /// Returns the saga status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the index of the step currently executing (or next to execute).
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// Returns the names of completed steps, in completion order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Returns the names of successfully compensated steps, in compensation order.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    /// Returns the step that failed, if any.
    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    /// Returns the recorded step error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns compensation actions that failed during the sweep.
    pub fn compensation_failures(&self) -> &[CompensationFailure] {
        &self.compensation_failures
    }

    /// Returns when the saga was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the saga last changed.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns when the saga reached a terminal status.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}
