//! Saga status machine.

use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// Status transitions:
/// ```text
/// Started ──► InProgress ──┬──► Completed
///                          └──► Failed ──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Instance created, no step has run yet.
    #[default]
    Started,

    /// Steps are being executed in definition order.
    InProgress,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed; compensation is about to begin.
    Failed,

    /// Completed steps are being compensated in reverse order.
    Compensating,

    /// Compensation sweep finished after a failure (terminal state).
    Compensated,
}

impl SagaStatus {
    /// Returns true if steps may still be executed.
    pub fn can_execute(&self) -> bool {
        matches!(self, SagaStatus::Started | SagaStatus::InProgress)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
