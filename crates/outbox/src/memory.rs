use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use tokio::sync::RwLock;

use crate::config::RetryPolicy;
use crate::error::{OutboxError, Result};
use crate::event::OutboxEvent;
use crate::repository::OutboxRepository;

/// In-memory outbox repository.
///
/// Events live in a single vector in insertion order.
#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    events: Arc<RwLock<Vec<OutboxEvent>>>,
}

impl InMemoryOutboxRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    async fn update<F>(&self, id: EventId, f: F) -> Result<()>
    where
        F: FnOnce(&mut OutboxEvent) + Send,
    {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::EventNotFound(id))?;
        f(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn save(&self, event: OutboxEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<OutboxEvent>> {
        Ok(self.events.read().await.clone())
    }

    async fn fetch_dispatchable(
        &self,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.is_dispatchable(now, policy))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: EventId, at: DateTime<Utc>) -> Result<()> {
        self.update(id, |e| e.mark_processed(at)).await
    }

    async fn record_failure(&self, id: EventId, at: DateTime<Utc>, error: &str) -> Result<()> {
        self.update(id, |e| e.record_failure(at, error)).await
    }

    async fn reset_failed(&self, policy: &RetryPolicy) -> Result<usize> {
        let mut events = self.events.write().await;
        let mut reset = 0;
        for event in events.iter_mut().filter(|e| e.is_failed(policy)) {
            event.reset_attempts();
            reset += 1;
        }
        Ok(reset)
    }

    async fn purge_processed(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| !(e.processed && e.processed_at.is_some_and(|at| at < cutoff)));
        Ok(before - events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn event(aggregate_id: &str) -> OutboxEvent {
        OutboxEvent::new(aggregate_id, "order.created", json!({"id": aggregate_id}))
    }

    fn no_delay(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = InMemoryOutboxRepository::new();
        let e = event("a");
        let id = e.id;
        repo.save(e).await.unwrap();

        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.aggregate_id, "a");
        assert!(repo.get(EventId::new()).await.unwrap().is_none());
        assert_eq!(repo.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_fetch_dispatchable_is_fifo_and_limited() {
        let repo = InMemoryOutboxRepository::new();
        for name in ["a", "b", "c"] {
            repo.save(event(name)).await.unwrap();
        }

        let batch = repo
            .fetch_dispatchable(Utc::now(), &no_delay(3), 2)
            .await
            .unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.aggregate_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_processed_events_are_not_dispatchable() {
        let repo = InMemoryOutboxRepository::new();
        let e = event("a");
        let id = e.id;
        repo.save(e).await.unwrap();

        repo.mark_processed(id, Utc::now()).await.unwrap();
        let batch = repo
            .fetch_dispatchable(Utc::now(), &no_delay(3), 10)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_event_fails() {
        let repo = InMemoryOutboxRepository::new();
        let result = repo.mark_processed(EventId::new(), Utc::now()).await;
        assert!(matches!(result, Err(OutboxError::EventNotFound(_))));
    }

    #[tokio::test]
    async fn test_reset_failed_only_touches_exhausted_events() {
        let repo = InMemoryOutboxRepository::new();
        let policy = no_delay(1);
        let exhausted = event("a");
        let fresh = event("b");
        let exhausted_id = exhausted.id;
        repo.save(exhausted).await.unwrap();
        repo.save(fresh).await.unwrap();

        repo.record_failure(exhausted_id, Utc::now(), "down")
            .await
            .unwrap();
        assert_eq!(repo.reset_failed(&policy).await.unwrap(), 1);

        let reset = repo.get(exhausted_id).await.unwrap().unwrap();
        assert_eq!(reset.attempts, 0);
        assert!(reset.last_attempt_at.is_none());
        // The last error stays for diagnosis.
        assert_eq!(reset.last_error.as_deref(), Some("down"));
    }

    #[tokio::test]
    async fn test_purge_processed_respects_cutoff() {
        let repo = InMemoryOutboxRepository::new();
        let old = event("old");
        let pending = event("pending");
        let old_id = old.id;
        repo.save(old).await.unwrap();
        repo.save(pending).await.unwrap();

        let processed_at = Utc::now();
        repo.mark_processed(old_id, processed_at).await.unwrap();

        // Cutoff before the processed time keeps it.
        let kept = repo
            .purge_processed(processed_at - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(kept, 0);

        let purged = repo
            .purge_processed(processed_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.event_count().await, 1);
    }
}
