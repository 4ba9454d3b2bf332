//! Wires the saga orchestrator, outbox relay and two-phase commit
//! coordinator together.
//!
//! Saga notifications are staged in the outbox as they arrive, and the
//! relay publishes them to in-process subscribers.

pub mod config;
pub mod error;

use std::sync::Arc;

use common::SagaId;
use outbox::{InMemoryEventPublisher, InMemoryOutboxRepository, OutboxRelay};
use saga::order_fulfillment;
use saga::{InMemoryInventoryService, InMemoryPaymentService, SagaContext, SagaOrchestrator};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use two_phase_commit::{InMemoryResourceManager, TwoPhaseCoordinator, TwoPhaseOutcome};

use crate::config::Config;
use crate::error::Result;

/// Outbox relay over the in-memory store and publisher.
pub type Relay = OutboxRelay<InMemoryOutboxRepository, InMemoryEventPublisher>;

/// Resource managers registered with the coordinator.
pub const RESOURCE_MANAGERS: [&str; 3] = ["database", "cache", "file-system"];

/// The running coordinators and their in-memory collaborators.
pub struct App {
    pub orchestrator: SagaOrchestrator,
    pub relay: Relay,
    pub coordinator: TwoPhaseCoordinator,
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
}

/// Creates the application with in-memory services.
pub async fn create_default_app(config: &Config) -> Result<App> {
    let inventory = InMemoryInventoryService::new();
    let payment = InMemoryPaymentService::new();

    let orchestrator = SagaOrchestrator::with_config(config.saga_config());
    orchestrator
        .register_saga(order_fulfillment::definition(
            inventory.clone(),
            payment.clone(),
        ))
        .await?;

    let publisher = InMemoryEventPublisher::new();
    for event_type in ["saga.completed", "saga.compensated"] {
        publisher.subscribe(event_type, move |payload: &Value| {
            tracing::info!(event_type, saga_id = %payload["saga_id"], "saga event delivered");
            Ok(())
        });
    }
    let relay = OutboxRelay::new(
        InMemoryOutboxRepository::new(),
        publisher,
        config.outbox_config(),
    );

    let coordinator = TwoPhaseCoordinator::new(config.coordinator_config());
    for id in RESOURCE_MANAGERS {
        coordinator
            .register_resource_manager(Arc::new(InMemoryResourceManager::new(id)))
            .await;
    }

    Ok(App {
        orchestrator,
        relay,
        coordinator,
        inventory,
        payment,
    })
}

/// Stages every saga notification in the outbox until the orchestrator
/// is dropped or the task is aborted.
pub fn forward_saga_notifications(orchestrator: &SagaOrchestrator, relay: Relay) -> JoinHandle<()> {
    let mut notifications = orchestrator.subscribe();

    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    let staged = relay
                        .save_serialized(
                            notification.saga_id().to_string(),
                            notification.event_type(),
                            &notification,
                        )
                        .await;
                    if let Err(e) = staged {
                        tracing::error!(error = %e, "failed to stage saga notification");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "saga notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// IDs and outcomes produced by [`run_scenarios`].
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub fulfilled_order: SagaId,
    pub rejected_order: SagaId,
    pub committed: TwoPhaseOutcome,
    pub aborted: TwoPhaseOutcome,
}

/// Runs one successful and one compensated order saga, then one committed
/// and one aborted two-phase commit.
pub async fn run_scenarios(app: &App) -> Result<ScenarioReport> {
    let fulfilled_order = app
        .orchestrator
        .start_saga(
            order_fulfillment::SAGA_TYPE,
            context(json!({
                "order_id": "order-1001",
                "item_id": "SKU-001",
                "quantity": 2,
                "amount": 4500,
            })),
        )
        .await?;

    // No item_id: inventory reservation fails and validation is compensated.
    let rejected_order = app
        .orchestrator
        .start_saga(
            order_fulfillment::SAGA_TYPE,
            context(json!({"order_id": "order-1002", "amount": 1200})),
        )
        .await?;

    let committed = app
        .coordinator
        .execute_two_phase_commit(RESOURCE_MANAGERS, json!({"order_id": "order-1001"}))
        .await?;

    // "queue" has no resource manager, so the prepare round fails.
    let aborted = app
        .coordinator
        .execute_two_phase_commit(["database", "queue"], json!({"order_id": "order-1002"}))
        .await?;

    Ok(ScenarioReport {
        fulfilled_order,
        rejected_order,
        committed,
        aborted,
    })
}

fn context(value: Value) -> SagaContext {
    match value {
        Value::Object(map) => map,
        _ => SagaContext::new(),
    }
}
