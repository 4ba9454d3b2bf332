//! Two-phase commit coordinator.
//!
//! A [`TwoPhaseCoordinator`] asks every participant's [`ResourceManager`] to
//! prepare, then commits only if all of them voted yes. Decisions are
//! recorded in a [`TransactionLog`] so a commit that did not reach every
//! participant can be finished later with
//! [`TwoPhaseCoordinator::resolve_in_doubt`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod resource_manager;
pub mod transaction;

pub use config::CoordinatorConfig;
pub use coordinator::{TransactionStats, TwoPhaseCoordinator};
pub use error::{ResourceManagerError, Result, TwoPhaseError};
pub use log::{Decision, InMemoryTransactionLog, LogEntry, LogRecord, TransactionLog};
pub use resource_manager::{InMemoryResourceManager, ResourceCall, ResourceManager};
pub use transaction::{
    GlobalTransaction, Participant, ParticipantStatus, Phase, TransactionStatus, TwoPhaseOutcome,
};
