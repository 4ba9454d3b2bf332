//! Outbox repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::event::OutboxEvent;

/// Durable staging area for outbox events.
///
/// Implementations must keep events in insertion order so that
/// `fetch_dispatchable` hands them to the relay oldest first.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Stores a new event.
    async fn save(&self, event: OutboxEvent) -> Result<()>;

    /// Returns an event by ID.
    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>>;

    /// Returns every stored event in insertion order.
    async fn list(&self) -> Result<Vec<OutboxEvent>>;

    /// Returns up to `limit` events a sweep at `now` should attempt.
    async fn fetch_dispatchable(
        &self,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>>;

    /// Records a successful publish attempt.
    async fn mark_processed(&self, id: EventId, at: DateTime<Utc>) -> Result<()>;

    /// Records a failed publish attempt.
    async fn record_failure(&self, id: EventId, at: DateTime<Utc>, error: &str) -> Result<()>;

    /// Resets the attempt counter of every event that exhausted its retries.
    /// Returns how many events were reset.
    async fn reset_failed(&self, policy: &RetryPolicy) -> Result<usize>;

    /// Deletes processed events whose `processed_at` is before `cutoff`.
    async fn purge_processed(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
