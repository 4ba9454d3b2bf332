//! Two-phase commit error types.

use common::TransactionId;
use thiserror::Error;

/// Errors raised by the coordinator.
///
/// Participant-level variants are not returned from
/// `execute_two_phase_commit`; they are recorded as the participant's error
/// message and surface as a failed outcome instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TwoPhaseError {
    #[error("Transaction has no participants")]
    NoParticipants,

    #[error("Participant '{0}' listed more than once")]
    DuplicateParticipant(String),

    #[error("No resource manager registered for '{0}'")]
    ResourceManagerNotFound(String),

    #[error("Participant '{participant}' failed to prepare: {reason}")]
    PrepareFailed { participant: String, reason: String },

    #[error("Participant '{participant}' failed to commit: {reason}")]
    CommitFailed { participant: String, reason: String },

    #[error("Participant '{participant}' failed to abort: {reason}")]
    AbortFailed { participant: String, reason: String },

    #[error("Participant '{participant}' timed out during {operation}")]
    Timeout {
        participant: String,
        operation: &'static str,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Transaction {0} is not in doubt")]
    NotInDoubt(TransactionId),

    #[error("Transaction log error: {0}")]
    Log(String),
}

/// Error returned by a resource manager call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceManagerError {
    /// The underlying resource could not be reached.
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, TwoPhaseError>;
