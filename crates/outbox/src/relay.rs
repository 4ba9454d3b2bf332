//! The outbox relay: staging, sweeping and the background processor.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::EventId;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::OutboxConfig;
use crate::error::Result;
use crate::event::OutboxEvent;
use crate::publisher::EventPublisher;
use crate::repository::OutboxRepository;

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Events handed to the publisher.
    pub attempted: usize,
    /// Events acknowledged and marked processed.
    pub published: usize,
    /// Events whose publish failed.
    pub failed: usize,
    /// Failed events that have now used their whole retry budget.
    pub exhausted: usize,
    /// True if another sweep was running and this one did nothing.
    pub skipped: bool,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Event counts derived from the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub total: usize,
    pub processed: usize,
    /// Unprocessed and still eligible for retry.
    pub pending: usize,
    /// Unprocessed with the retry budget used up.
    pub failed: usize,
}

struct ProcessorHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct RelayInner<R, P> {
    repository: R,
    publisher: P,
    config: OutboxConfig,
    sweep: Mutex<()>,
    processor: Mutex<Option<ProcessorHandle>>,
}

/// Stages events durably and relays them to a publisher.
///
/// `save_event` only writes to the repository. Delivery happens in sweeps,
/// either on demand through `process_pending` or from the background
/// processor. An event is marked processed only after the publisher
/// acknowledges it, so delivery is at-least-once.
pub struct OutboxRelay<R, P> {
    inner: Arc<RelayInner<R, P>>,
}

impl<R, P> Clone for OutboxRelay<R, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, P> OutboxRelay<R, P>
where
    R: OutboxRepository + 'static,
    P: EventPublisher + 'static,
{
    /// Creates a relay over the given repository and publisher.
    pub fn new(repository: R, publisher: P, config: OutboxConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                repository,
                publisher,
                config,
                sweep: Mutex::new(()),
                processor: Mutex::new(None),
            }),
        }
    }

    /// Returns the underlying repository.
    pub fn repository(&self) -> &R {
        &self.inner.repository
    }

    /// Returns the underlying publisher.
    pub fn publisher(&self) -> &P {
        &self.inner.publisher
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.inner.config
    }

    /// Stages an event for publication.
    ///
    /// The publisher is never called here.
    #[tracing::instrument(skip(self, aggregate_id, event_type, payload))]
    pub async fn save_event(
        &self,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Result<EventId> {
        let event = OutboxEvent::new(aggregate_id, event_type, payload);
        let id = event.id;
        debug!(event_id = %id, event_type = %event.event_type, "staging outbox event");

        self.inner.repository.save(event).await?;
        metrics::counter!("outbox_events_saved_total").increment(1);
        Ok(id)
    }

    /// Serializes `payload` and stages it.
    pub async fn save_serialized<T: Serialize>(
        &self,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<EventId> {
        let payload = serde_json::to_value(payload)?;
        self.save_event(aggregate_id, event_type, payload).await
    }

    /// Runs one sweep over dispatchable events, oldest first.
    ///
    /// If a sweep is already running this returns immediately with
    /// `skipped` set.
    #[tracing::instrument(skip(self))]
    pub async fn process_pending(&self) -> Result<SweepReport> {
        let Ok(_guard) = self.inner.sweep.try_lock() else {
            debug!("sweep already in progress, skipping");
            return Ok(SweepReport::skipped());
        };

        let policy = &self.inner.config.retry;
        let events = self
            .inner
            .repository
            .fetch_dispatchable(Utc::now(), policy, self.inner.config.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for event in events {
            report.attempted += 1;
            match self
                .inner
                .publisher
                .publish(&event.event_type, &event.payload)
                .await
            {
                Ok(()) => {
                    self.inner
                        .repository
                        .mark_processed(event.id, Utc::now())
                        .await?;
                    report.published += 1;
                    metrics::counter!("outbox_events_published_total").increment(1);
                }
                Err(e) => {
                    let attempts = event.attempts.saturating_add(1);
                    self.inner
                        .repository
                        .record_failure(event.id, Utc::now(), &e.reason)
                        .await?;
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);

                    if attempts >= policy.max_retries {
                        report.exhausted += 1;
                        warn!(
                            event_id = %event.id,
                            attempts,
                            error = %e,
                            "outbox event exhausted its retries"
                        );
                    } else {
                        warn!(event_id = %event.id, attempts, error = %e, "publish failed");
                    }
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                published = report.published,
                failed = report.failed,
                "outbox sweep complete"
            );
        }
        Ok(report)
    }

    /// Starts the background processor at the configured poll interval.
    pub async fn start(&self) -> bool {
        self.start_processor(self.inner.config.poll_interval).await
    }

    /// Starts the background processor, sweeping every `interval`.
    ///
    /// Returns `false` without doing anything if it is already running.
    /// The processor does not keep the relay alive: once every handle is
    /// dropped it exits on its own.
    pub async fn start_processor(&self, interval: Duration) -> bool {
        let mut processor = self.inner.processor.lock().await;
        if processor.as_ref().is_some_and(|p| !p.task.is_finished()) {
            debug!("outbox processor already running");
            return false;
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let relay = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "outbox processor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(relay) = Self::upgrade(&relay) else {
                            debug!("outbox relay dropped, processor exiting");
                            break;
                        };
                        if let Err(e) = relay.process_pending().await {
                            error!(error = %e, "outbox sweep failed");
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("outbox processor stopped");
                            break;
                        }
                    }
                }
            }
        });

        *processor = Some(ProcessorHandle {
            cancel: cancel_tx,
            task,
        });
        true
    }

    fn upgrade(inner: &Weak<RelayInner<R, P>>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Stops the background processor and waits for it to exit.
    ///
    /// A sweep in flight runs to completion first. Returns `false` if the
    /// processor was not running.
    pub async fn stop_processor(&self) -> bool {
        let Some(handle) = self.inner.processor.lock().await.take() else {
            return false;
        };

        // The task may already have exited; a closed channel is fine.
        let _ = handle.cancel.send(true);
        if let Err(e) = handle.task.await {
            error!(error = %e, "outbox processor task failed");
        }
        true
    }

    /// Returns true while the background processor is running.
    pub async fn is_running(&self) -> bool {
        self.inner
            .processor
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    /// Stops the processor and runs one final sweep.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<SweepReport> {
        self.stop_processor().await;
        let report = self.process_pending().await?;
        info!(published = report.published, "outbox relay shut down");
        Ok(report)
    }

    /// Returns event counts.
    pub async fn get_stats(&self) -> Result<OutboxStats> {
        let policy = &self.inner.config.retry;
        let events = self.inner.repository.list().await?;

        let mut stats = OutboxStats {
            total: events.len(),
            ..OutboxStats::default()
        };
        for event in &events {
            if event.processed {
                stats.processed += 1;
            } else if event.is_failed(policy) {
                stats.failed += 1;
            } else {
                stats.pending += 1;
            }
        }
        Ok(stats)
    }

    /// Makes events that exhausted their retries eligible again.
    ///
    /// Returns how many events were reset.
    #[tracing::instrument(skip(self))]
    pub async fn retry_failed_events(&self) -> Result<usize> {
        let reset = self
            .inner
            .repository
            .reset_failed(&self.inner.config.retry)
            .await?;
        info!(reset, "failed outbox events reset for retry");
        Ok(reset)
    }

    /// Deletes processed events older than `retention`.
    #[tracing::instrument(skip(self))]
    pub async fn purge_processed(&self, retention: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let purged = self.inner.repository.purge_processed(cutoff).await?;
        debug!(purged, "purged processed outbox events");
        Ok(purged)
    }
}
