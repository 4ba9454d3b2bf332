//! Outbox event record.

use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RetryPolicy;

/// An event staged for publication.
///
/// `attempts` counts every publish attempt, successful or not, so an event
/// that failed twice and then went out carries `attempts == 3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Creates an unprocessed event with no attempts.
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
            processed: false,
            processed_at: None,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Unprocessed and still within the retry budget.
    pub fn is_pending(&self, policy: &RetryPolicy) -> bool {
        !self.processed && self.attempts < policy.max_retries
    }

    /// Unprocessed with the retry budget used up.
    pub fn is_failed(&self, policy: &RetryPolicy) -> bool {
        !self.processed && self.attempts >= policy.max_retries
    }

    /// Returns true if a sweep at `now` should attempt this event.
    pub fn is_dispatchable(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        if !self.is_pending(policy) {
            return false;
        }
        match self.last_attempt_at {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= policy.delay_for(self.attempts)),
        }
    }

    pub(crate) fn mark_processed(&mut self, at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(at);
        self.processed = true;
        self.processed_at = Some(at);
    }

    pub(crate) fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
    }

    pub(crate) fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.last_attempt_at = None;
    }
}
