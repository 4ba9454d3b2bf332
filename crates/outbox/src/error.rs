//! Outbox error types.

use common::EventId;
use thiserror::Error;

/// Errors that can occur when staging or relaying outbox events.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No event exists with this ID.
    #[error("Outbox event not found: {0}")]
    EventNotFound(EventId),

    /// The backing store failed.
    ///
    /// The in-memory repository never fails; durable repositories report
    /// their storage errors through this variant.
    #[error("Outbox repository error: {0}")]
    Repository(String),

    /// A payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A publish attempt that did not receive an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to publish '{event_type}': {reason}")]
pub struct PublishError {
    /// The event type being published.
    pub event_type: String,
    /// Why the publish failed.
    pub reason: String,
}

impl PublishError {
    /// Creates a publish error for the given event type.
    pub fn new(event_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
