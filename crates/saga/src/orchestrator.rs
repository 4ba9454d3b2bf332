//! Saga orchestrator for registered multi-step sagas.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::SagaId;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};

use crate::config::SagaConfig;
use crate::definition::{SagaContext, SagaDefinition, StepResult};
use crate::error::{Result, SagaError, StepError};
use crate::events::{SagaEvent, SagaNotification};
use crate::instance::SagaInstance;
use crate::state::SagaStatus;

/// Instance counts by status, derived from the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SagaStats {
    pub total: usize,
    pub started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub compensating: usize,
    pub compensated: usize,
}

/// Runs registered sagas and keeps their instances.
///
/// Each instance's steps run strictly in definition order. Different
/// instances may run concurrently; the registries are shared behind
/// `RwLock`s and callers only ever get cloned snapshots. A step works on
/// a copy of the context, and its update is merged in a single write, so
/// a concurrent `get_saga_status` sees either the state before the step or
/// the state after it.
#[derive(Clone)]
pub struct SagaOrchestrator {
    definitions: Arc<RwLock<HashMap<String, Arc<SagaDefinition>>>>,
    sagas: Arc<RwLock<HashMap<SagaId, SagaInstance>>>,
    notifications: broadcast::Sender<SagaNotification>,
    config: SagaConfig,
}

impl SagaOrchestrator {
    /// Creates an orchestrator with default configuration.
    pub fn new() -> Self {
        Self::with_config(SagaConfig::default())
    }

    /// Creates an orchestrator with the given configuration.
    pub fn with_config(config: SagaConfig) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            definitions: Arc::new(RwLock::new(HashMap::new())),
            sagas: Arc::new(RwLock::new(HashMap::new())),
            notifications,
            config,
        }
    }

    /// Registers a saga definition under its type name.
    ///
    /// Re-registering an existing type is rejected.
    #[tracing::instrument(skip(self, definition), fields(saga_type = definition.saga_type()))]
    pub async fn register_saga(&self, definition: SagaDefinition) -> Result<()> {
        definition.validate()?;

        let mut definitions = self.definitions.write().await;
        if definitions.contains_key(definition.saga_type()) {
            return Err(SagaError::DuplicateSagaType(
                definition.saga_type().to_string(),
            ));
        }

        tracing::info!(steps = definition.steps().len(), "saga type registered");
        definitions.insert(definition.saga_type().to_string(), Arc::new(definition));
        Ok(())
    }

    /// Returns the registered saga type names.
    pub async fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.definitions.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Starts a saga and drives it to a terminal status before returning.
    ///
    /// Step failures do not surface here; inspect the instance with
    /// [`get_saga_status`](Self::get_saga_status).
    pub async fn start_saga(&self, saga_type: &str, context: SagaContext) -> Result<SagaId> {
        let (saga_id, definition) = self.create_instance(saga_type, context).await?;
        self.run(saga_id, definition).await;
        Ok(saga_id)
    }

    /// Starts a saga on its own task and returns its ID immediately.
    pub async fn spawn_saga(&self, saga_type: &str, context: SagaContext) -> Result<SagaId> {
        let (saga_id, definition) = self.create_instance(saga_type, context).await?;
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run(saga_id, definition).await;
        });
        Ok(saga_id)
    }

    /// Returns a snapshot of a saga instance.
    pub async fn get_saga_status(&self, saga_id: SagaId) -> Option<SagaInstance> {
        self.sagas.read().await.get(&saga_id).cloned()
    }

    /// Subscribes to completion and compensation notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SagaNotification> {
        self.notifications.subscribe()
    }

    /// Returns instance counts by status.
    pub async fn stats(&self) -> SagaStats {
        let sagas = self.sagas.read().await;
        let mut stats = SagaStats {
            total: sagas.len(),
            ..SagaStats::default()
        };
        for saga in sagas.values() {
            match saga.status() {
                SagaStatus::Started => stats.started += 1,
                SagaStatus::InProgress => stats.in_progress += 1,
                SagaStatus::Completed => stats.completed += 1,
                SagaStatus::Failed => stats.failed += 1,
                SagaStatus::Compensating => stats.compensating += 1,
                SagaStatus::Compensated => stats.compensated += 1,
            }
        }
        stats
    }

    /// Removes terminal instances that finished at least `retention` ago.
    ///
    /// Returns the number of instances removed.
    pub async fn purge_terminal(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut sagas = self.sagas.write().await;
        let before = sagas.len();
        sagas.retain(|_, saga| {
            let expired = saga.status().is_terminal()
                && saga
                    .completed_at()
                    .and_then(|at| (now - at).to_std().ok())
                    .is_some_and(|age| age >= retention);
            !expired
        });
        before - sagas.len()
    }

    async fn create_instance(
        &self,
        saga_type: &str,
        context: SagaContext,
    ) -> Result<(SagaId, Arc<SagaDefinition>)> {
        let definition = self
            .definitions
            .read()
            .await
            .get(saga_type)
            .cloned()
            .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))?;

        let saga_id = SagaId::new();
        let instance = SagaInstance::new(saga_id, saga_type, context);
        self.sagas.write().await.insert(saga_id, instance);

        metrics::counter!("saga_started_total", "saga_type" => saga_type.to_string())
            .increment(1);
        tracing::info!(%saga_id, saga_type, "saga started");

        Ok((saga_id, definition))
    }

    #[tracing::instrument(skip(self, definition), fields(saga_type = definition.saga_type()))]
    async fn run(&self, saga_id: SagaId, definition: Arc<SagaDefinition>) {
        let saga_start = Instant::now();

        for (index, step) in definition.steps().iter().enumerate() {
            let Some(snapshot) = self
                .apply(saga_id, SagaEvent::step_started(index, step.name()))
                .await
            else {
                return;
            };

            tracing::info!(step = step.name(), "saga step started");
            match self.call(step.execute(snapshot.context().clone())).await {
                Ok(update) => {
                    self.apply(saga_id, SagaEvent::step_completed(step.name(), update))
                        .await;
                    tracing::info!(step = step.name(), "saga step completed");
                }
                Err(e) => {
                    let failure = SagaError::StepExecutionFailed {
                        step: step.name().to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(%saga_id, error = %failure, "saga step failed");
                    self.apply(saga_id, SagaEvent::step_failed(step.name(), e.to_string()))
                        .await;

                    self.compensate(saga_id, &definition).await;
                    metrics::histogram!("saga_duration_seconds")
                        .record(saga_start.elapsed().as_secs_f64());
                    return;
                }
            }
        }

        self.apply(saga_id, SagaEvent::saga_completed()).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed_total").increment(1);
        tracing::info!(%saga_id, duration, "saga completed successfully");

        self.notify(SagaNotification::Completed {
            saga_id,
            saga_type: definition.saga_type().to_string(),
        });
    }

    /// Runs compensations for completed steps in reverse completion order.
    ///
    /// Every completed step gets an attempt; a failing compensation is
    /// recorded and the sweep moves on.
    #[tracing::instrument(skip(self, definition))]
    async fn compensate(&self, saga_id: SagaId, definition: &SagaDefinition) {
        let Some(snapshot) = self.apply(saga_id, SagaEvent::CompensationStarted).await else {
            return;
        };

        let context = snapshot.context().clone();
        for step_name in snapshot.completed_steps().iter().rev() {
            let Some(step) = definition.step_named(step_name) else {
                continue;
            };
            let Some(compensation) = step.compensate(context.clone()) else {
                tracing::debug!(step = %step_name, "no compensation defined, skipping");
                continue;
            };

            match self.call(compensation).await {
                Ok(()) => {
                    self.apply(saga_id, SagaEvent::compensation_step_completed(step_name))
                        .await;
                    tracing::info!(step = %step_name, "compensation step completed");
                }
                Err(e) => {
                    let failure = SagaError::CompensationFailed {
                        step: step_name.clone(),
                        reason: e.to_string(),
                    };
                    tracing::error!(%saga_id, error = %failure, "compensation step failed");
                    self.apply(
                        saga_id,
                        SagaEvent::compensation_step_failed(step_name, e.to_string()),
                    )
                    .await;
                }
            }
        }

        let Some(finished) = self.apply(saga_id, SagaEvent::saga_compensated()).await else {
            return;
        };

        metrics::counter!("saga_compensated_total").increment(1);
        tracing::warn!(
            %saga_id,
            failed_step = finished.failed_step().unwrap_or("unknown"),
            "saga compensated"
        );

        self.notify(SagaNotification::Compensated {
            saga_id,
            saga_type: finished.saga_type().to_string(),
            failed_step: finished.failed_step().map(str::to_string),
            error: finished.error().map(str::to_string),
        });
    }

    /// Applies an event under the registry lock and returns the new snapshot.
    async fn apply(&self, saga_id: SagaId, event: SagaEvent) -> Option<SagaInstance> {
        let mut sagas = self.sagas.write().await;
        let Some(saga) = sagas.get_mut(&saga_id) else {
            tracing::warn!(%saga_id, event = event.event_type(), "saga instance vanished");
            return None;
        };
        saga.apply(event);
        Some(saga.clone())
    }

    /// Awaits a step future under the configured deadline, turning panics
    /// into step failures.
    async fn call<T>(&self, fut: BoxFuture<'static, StepResult<T>>) -> StepResult<T> {
        let guarded = AssertUnwindSafe(fut).catch_unwind();
        let outcome = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(StepError::TimedOut(limit)),
            },
            None => guarded.await,
        };
        outcome.unwrap_or_else(|_| Err(StepError::failed("step panicked")))
    }

    fn notify(&self, notification: SagaNotification) {
        // No subscribers is not an error.
        let _ = self.notifications.send(notification);
    }
}

impl Default for SagaOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SagaStep;
    use serde_json::json;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> SagaContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// A step that records execute/compensate calls and sets `<name>: true`.
    fn recording_step(name: &'static str, journal: &Journal) -> SagaStep {
        let exec_journal = Arc::clone(journal);
        let comp_journal = Arc::clone(journal);
        SagaStep::new(name, move |_ctx| {
            let journal = Arc::clone(&exec_journal);
            async move {
                journal.lock().unwrap().push(format!("execute:{name}"));
                Ok(ctx(&[(name, json!(true))]))
            }
        })
        .with_compensation(move |_ctx| {
            let journal = Arc::clone(&comp_journal);
            async move {
                journal.lock().unwrap().push(format!("compensate:{name}"));
                Ok(())
            }
        })
    }

    fn failing_step(name: &'static str) -> SagaStep {
        SagaStep::new(name, move |_ctx| async move {
            Err(StepError::failed(format!("{name} exploded")))
        })
    }

    #[tokio::test]
    async fn test_happy_path_runs_steps_in_order() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .register_saga(
                SagaDefinition::new("abc")
                    .step(recording_step("a", &journal))
                    .step(recording_step("b", &journal))
                    .step(recording_step("c", &journal)),
            )
            .await
            .unwrap();

        let saga_id = orchestrator
            .start_saga("abc", SagaContext::new())
            .await
            .unwrap();

        let saga = orchestrator.get_saga_status(saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Completed);
        assert_eq!(saga.completed_steps(), &["a", "b", "c"]);
        assert_eq!(saga.current_step_index(), 3);
        assert!(saga.completed_at().is_some());
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["execute:a", "execute:b", "execute:c"]
        );
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse_order() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .register_saga(
                SagaDefinition::new("abc")
                    .step(recording_step("a", &journal))
                    .step(recording_step("b", &journal))
                    .step(failing_step("c")),
            )
            .await
            .unwrap();

        let saga_id = orchestrator
            .start_saga("abc", SagaContext::new())
            .await
            .unwrap();

        let saga = orchestrator.get_saga_status(saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(saga.completed_steps(), &["a", "b"]);
        assert_eq!(saga.compensated_steps(), &["b", "a"]);
        assert_eq!(saga.failed_step(), Some("c"));
        assert_eq!(saga.error(), Some("c exploded"));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["execute:a", "execute:b", "compensate:b", "compensate:a"]
        );
    }

    #[tokio::test]
    async fn test_unknown_saga_type() {
        let orchestrator = SagaOrchestrator::new();
        let result = orchestrator.start_saga("missing", SagaContext::new()).await;
        assert!(matches!(result, Err(SagaError::UnknownSagaType(t)) if t == "missing"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::new();
        let def = SagaDefinition::new("dup").step(recording_step("a", &journal));

        orchestrator.register_saga(def.clone()).await.unwrap();
        let result = orchestrator.register_saga(def).await;
        assert!(matches!(result, Err(SagaError::DuplicateSagaType(t)) if t == "dup"));
        assert_eq!(orchestrator.registered_types().await, vec!["dup"]);
    }

    #[tokio::test]
    async fn test_step_timeout_triggers_compensation() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::with_config(
            SagaConfig::default().with_step_timeout(Duration::from_millis(20)),
        );
        orchestrator
            .register_saga(
                SagaDefinition::new("slow")
                    .step(recording_step("a", &journal))
                    .step(SagaStep::new("sleepy", |_ctx| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(SagaContext::new())
                    })),
            )
            .await
            .unwrap();

        let saga_id = orchestrator
            .start_saga("slow", SagaContext::new())
            .await
            .unwrap();

        let saga = orchestrator.get_saga_status(saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(saga.failed_step(), Some("sleepy"));
        assert_eq!(saga.error(), Some("timed out after 20ms"));
        assert_eq!(saga.compensated_steps(), &["a"]);
    }

    #[tokio::test]
    async fn test_panicking_step_is_treated_as_failure() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .register_saga(
                SagaDefinition::new("panics")
                    .step(recording_step("a", &journal))
                    .step(SagaStep::new("boom", |_ctx| async {
                        let explode = true;
                        if explode {
                            panic!("unexpected");
                        }
                        Ok(SagaContext::new())
                    })),
            )
            .await
            .unwrap();

        let saga_id = orchestrator
            .start_saga("panics", SagaContext::new())
            .await
            .unwrap();

        let saga = orchestrator.get_saga_status(saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(saga.error(), Some("step panicked"));
    }

    #[tokio::test]
    async fn test_notifications_are_broadcast() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .register_saga(SagaDefinition::new("ok").step(recording_step("a", &journal)))
            .await
            .unwrap();
        orchestrator
            .register_saga(SagaDefinition::new("bad").step(failing_step("x")))
            .await
            .unwrap();

        let mut rx = orchestrator.subscribe();

        let ok_id = orchestrator.start_saga("ok", SagaContext::new()).await.unwrap();
        let bad_id = orchestrator.start_saga("bad", SagaContext::new()).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            SagaNotification::Completed {
                saga_id: ok_id,
                saga_type: "ok".to_string(),
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SagaNotification::Compensated {
                saga_id: bad_id,
                saga_type: "bad".to_string(),
                failed_step: Some("x".to_string()),
                error: Some("x exploded".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_stats_and_purge() {
        let journal = Journal::default();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .register_saga(SagaDefinition::new("ok").step(recording_step("a", &journal)))
            .await
            .unwrap();
        orchestrator
            .register_saga(SagaDefinition::new("bad").step(failing_step("x")))
            .await
            .unwrap();

        orchestrator.start_saga("ok", SagaContext::new()).await.unwrap();
        orchestrator.start_saga("ok", SagaContext::new()).await.unwrap();
        orchestrator.start_saga("bad", SagaContext::new()).await.unwrap();

        let stats = orchestrator.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.compensated, 1);

        assert_eq!(orchestrator.purge_terminal(Duration::from_secs(3600)).await, 0);
        assert_eq!(orchestrator.purge_terminal(Duration::ZERO).await, 3);
        assert_eq!(orchestrator.stats().await.total, 0);
    }
}
