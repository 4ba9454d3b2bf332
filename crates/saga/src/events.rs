//! Saga lifecycle events and outward notifications.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::definition::SagaContext;

/// A state transition applied to a saga instance.
///
/// The orchestrator never mutates an instance directly; it builds one of
/// these and applies it under the registry write lock, so every transition
/// is visible to readers atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// A step is about to execute.
    StepStarted(StepStartedData),

    /// A step completed and produced a context update.
    StepCompleted(StepCompletedData),

    /// A step failed.
    StepFailed(StepFailedData),

    /// Compensation of completed steps began.
    CompensationStarted,

    /// A compensation action completed.
    CompensationStepCompleted(StepData),

    /// A compensation action failed (logged, compensation continues).
    CompensationStepFailed(StepFailedData),

    /// All steps completed.
    SagaCompleted(FinishedData),

    /// The compensation sweep finished.
    SagaCompensated(FinishedData),
}

impl SagaEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaCompensated(_) => "SagaCompensated",
        }
    }
}

/// Data for StepStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedData {
    /// Position of the step in the definition.
    pub step_index: usize,
    /// The step name.
    pub step_name: String,
}

/// Data for events that only carry a step name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    /// The step name.
    pub step_name: String,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    /// The step name.
    pub step_name: String,
    /// Partial context produced by the step.
    pub update: SagaContext,
}

/// Data for StepFailed and CompensationStepFailed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    /// The step that failed.
    pub step_name: String,
    /// Error message describing the failure.
    pub error: String,
}

/// Data for terminal events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedData {
    /// When the saga reached its terminal status.
    pub finished_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    /// Creates a StepStarted event.
    pub fn step_started(step_index: usize, step_name: impl Into<String>) -> Self {
        SagaEvent::StepStarted(StepStartedData {
            step_index,
            step_name: step_name.into(),
        })
    }

    /// Creates a StepCompleted event.
    pub fn step_completed(step_name: impl Into<String>, update: SagaContext) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            update,
        })
    }

    /// Creates a StepFailed event.
    pub fn step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    /// Creates a CompensationStepCompleted event.
    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    /// Creates a CompensationStepFailed event.
    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    /// Creates a SagaCompleted event.
    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(FinishedData {
            finished_at: Utc::now(),
        })
    }

    /// Creates a SagaCompensated event.
    pub fn saga_compensated() -> Self {
        SagaEvent::SagaCompensated(FinishedData {
            finished_at: Utc::now(),
        })
    }
}

/// Notification broadcast when a saga reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SagaNotification {
    /// Every step completed.
    Completed { saga_id: SagaId, saga_type: String },

    /// A step failed and the compensation sweep finished.
    Compensated {
        saga_id: SagaId,
        saga_type: String,
        failed_step: Option<String>,
        error: Option<String>,
    },
}

impl SagaNotification {
    /// Returns the saga this notification refers to.
    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaNotification::Completed { saga_id, .. }
            | SagaNotification::Compensated { saga_id, .. } => *saga_id,
        }
    }

    /// Returns a dotted event name suitable for publishing.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaNotification::Completed { .. } => "saga.completed",
            SagaNotification::Compensated { .. } => "saga.compensated",
        }
    }
}
