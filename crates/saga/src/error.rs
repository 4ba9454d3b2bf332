//! Saga error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the saga orchestrator.
///
/// Step and compensation failures are recorded on the saga instance rather
/// than returned to the caller of `start_saga`; the variants exist so they
/// can be logged and stored with a consistent shape.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga definition is registered under this type.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// A saga definition is already registered under this type.
    #[error("Saga type already registered: {0}")]
    DuplicateSagaType(String),

    /// The saga definition cannot be registered.
    #[error("Invalid saga definition '{saga_type}': {reason}")]
    InvalidDefinition { saga_type: String, reason: String },

    /// A saga step failed.
    #[error("Saga step '{step}' failed: {reason}")]
    StepExecutionFailed { step: String, reason: String },

    /// A compensation step failed.
    #[error("Compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: String, reason: String },
}

/// Error raised by a step's execute or compensate function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The step reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The step did not finish within the configured deadline.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl StepError {
    /// Creates a step failure from any displayable reason.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        StepError::Failed(reason.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display() {
        assert_eq!(StepError::failed("boom").to_string(), "boom");
        assert_eq!(
            StepError::TimedOut(Duration::from_millis(250)).to_string(),
            "timed out after 250ms"
        );
    }

    #[test]
    fn test_saga_error_display() {
        let err = SagaError::StepExecutionFailed {
            step: "reserve".to_string(),
            reason: "no stock".to_string(),
        };
        assert_eq!(err.to_string(), "Saga step 'reserve' failed: no stock");
        assert_eq!(
            SagaError::UnknownSagaType("refund".to_string()).to_string(),
            "Unknown saga type: refund"
        );
    }
}
