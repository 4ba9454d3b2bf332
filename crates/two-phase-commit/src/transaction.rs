//! Global transaction and participant state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a global transaction.
///
/// ```text
/// Preparing ──┬──► Prepared ──┬──► Committed
///             │               └──► Aborted   (a commit failed)
///             └──► Aborted                   (a prepare failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Preparing,
    Prepared,
    Committed,
    Aborted,
}

impl TransactionStatus {
    /// Returns true once the coordinator has finished with the transaction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Preparing => "PREPARING",
            TransactionStatus::Prepared => "PREPARED",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one participant within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    #[default]
    Preparing,
    Prepared,
    Committed,
    Aborted,
    Failed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Preparing => "PREPARING",
            ParticipantStatus::Prepared => "PREPARED",
            ParticipantStatus::Committed => "COMMITTED",
            ParticipantStatus::Aborted => "ABORTED",
            ParticipantStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resource taking part in a global transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    /// ID of the resource manager that handles this participant.
    pub resource_manager: String,
    pub status: ParticipantStatus,
    /// Data the participant prepared, set once it votes yes.
    pub prepare_data: Option<Value>,
    pub error: Option<String>,
}

impl Participant {
    /// Creates a participant handled by the resource manager of the same ID.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            resource_manager: id.clone(),
            id,
            status: ParticipantStatus::Preparing,
            prepare_data: None,
            error: None,
        }
    }
}

/// A transaction driven through prepare and commit by one coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTransaction {
    pub id: TransactionId,
    pub coordinator_id: String,
    pub status: TransactionStatus,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GlobalTransaction {
    /// Creates a transaction in `Preparing` with one participant per ID.
    pub fn new<I, S>(coordinator_id: impl Into<String>, participant_ids: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: TransactionId::new(),
            coordinator_id: coordinator_id.into(),
            status: TransactionStatus::Preparing,
            participants: participant_ids.into_iter().map(Participant::new).collect(),
            created_at: Utc::now(),
            timeout,
            completed_at: None,
        }
    }

    /// Returns the participant with the given ID.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Returns true if every participant has the given status.
    pub fn all(&self, status: ParticipantStatus) -> bool {
        self.participants.iter().all(|p| p.status == status)
    }

    /// Returns the IDs of participants with the given status.
    pub fn ids_with_status(&self, status: ParticipantStatus) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.id.clone())
            .collect()
    }

    pub(crate) fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// The protocol phase an outcome was decided in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Commit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Commit => "commit",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of running the protocol for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPhaseOutcome {
    pub success: bool,
    pub transaction_id: TransactionId,
    pub phase: Phase,
}
