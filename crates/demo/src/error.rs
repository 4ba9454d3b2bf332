//! Demo error type.

use outbox::OutboxError;
use saga::SagaError;
use thiserror::Error;
use two_phase_commit::TwoPhaseError;

/// Errors from any of the coordinators the demo drives.
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("saga: {0}")]
    Saga(#[from] SagaError),

    #[error("outbox: {0}")]
    Outbox(#[from] OutboxError),

    #[error("two-phase commit: {0}")]
    TwoPhase(#[from] TwoPhaseError),
}

pub type Result<T> = std::result::Result<T, DemoError>;
