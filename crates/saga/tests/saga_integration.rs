//! Integration tests for the saga orchestrator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use saga::order_fulfillment::{
    self, STEP_PROCESS_PAYMENT, STEP_RESERVE_INVENTORY, STEP_VALIDATE_ORDER,
};
use saga::{
    InMemoryInventoryService, InMemoryPaymentService, SagaContext, SagaDefinition,
    SagaNotification, SagaOrchestrator, SagaStatus, SagaStep, StepError,
};
use serde_json::{Value, json};

struct TestHarness {
    orchestrator: SagaOrchestrator,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
}

impl TestHarness {
    async fn new() -> Self {
        let orchestrator = SagaOrchestrator::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();

        orchestrator
            .register_saga(order_fulfillment::definition(
                inventory.clone(),
                payment.clone(),
            ))
            .await
            .unwrap();

        Self {
            orchestrator,
            inventory,
            payment,
        }
    }
}

fn context(value: Value) -> SagaContext {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn full_order(order_id: &str) -> SagaContext {
    context(json!({
        "order_id": order_id,
        "item_id": "SKU-001",
        "quantity": 2,
        "amount": 4500,
    }))
}

#[tokio::test]
async fn test_happy_path_full_order_fulfillment() {
    let h = TestHarness::new().await;

    let saga_id = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, full_order("o1"))
        .await
        .unwrap();

    let saga = h.orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.id(), saga_id);
    assert_eq!(saga.saga_type(), "order");
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(
        saga.completed_steps(),
        &[STEP_VALIDATE_ORDER, STEP_RESERVE_INVENTORY, STEP_PROCESS_PAYMENT]
    );

    // Each step's output was merged into the context
    let ctx = saga.context();
    assert_eq!(ctx.get("order_id"), Some(&json!("o1")));
    assert_eq!(ctx.get("validated"), Some(&json!(true)));
    assert_eq!(ctx.get("reserved"), Some(&json!(true)));
    assert_eq!(ctx.get("payment_processed"), Some(&json!(true)));
    assert!(ctx.get("reservation_id").is_some());
    assert!(ctx.get("payment_id").is_some());

    assert_eq!(h.inventory.reservation_count(), 1);
    assert_eq!(h.inventory.reserved_quantity("SKU-001"), 2);
    assert_eq!(h.payment.payment_count(), 1);
}

#[tokio::test]
async fn test_missing_item_compensates_validation_only() {
    let h = TestHarness::new().await;

    // No item_id: reserve_inventory fails after validate_order succeeded.
    let saga_id = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, context(json!({"order_id": "o1"})))
        .await
        .unwrap();

    let saga = h.orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(saga.completed_steps(), &[STEP_VALIDATE_ORDER]);
    assert_eq!(saga.compensated_steps(), &[STEP_VALIDATE_ORDER]);
    assert_eq!(saga.failed_step(), Some(STEP_RESERVE_INVENTORY));
    assert_eq!(saga.error(), Some("item_id is required"));

    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(h.payment.payment_count(), 0);
}

#[tokio::test]
async fn test_payment_failure_releases_inventory() {
    let h = TestHarness::new().await;
    h.payment.set_fail_on_charge(true);

    let saga_id = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, full_order("o1"))
        .await
        .unwrap();

    let saga = h.orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(
        saga.completed_steps(),
        &[STEP_VALIDATE_ORDER, STEP_RESERVE_INVENTORY]
    );
    assert_eq!(
        saga.compensated_steps(),
        &[STEP_RESERVE_INVENTORY, STEP_VALIDATE_ORDER]
    );
    assert_eq!(saga.error(), Some("Payment declined"));

    // Inventory reservation should be released (compensated)
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(h.payment.payment_count(), 0);
}

#[tokio::test]
async fn test_invalid_amount_fails_payment_step() {
    let h = TestHarness::new().await;

    let mut ctx = full_order("o1");
    ctx.insert("amount".to_string(), json!(0));

    let saga_id = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, ctx)
        .await
        .unwrap();

    let saga = h.orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(saga.failed_step(), Some(STEP_PROCESS_PAYMENT));
    assert_eq!(saga.error(), Some("Invalid payment amount"));
    assert_eq!(h.inventory.reservation_count(), 0);
}

#[tokio::test]
async fn test_compensation_failure_does_not_halt_sweep() {
    let h = TestHarness::new().await;
    h.payment.set_fail_on_charge(true);
    h.inventory.set_fail_on_release(true);

    let saga_id = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, full_order("o1"))
        .await
        .unwrap();

    let saga = h.orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensated);

    // Releasing inventory failed, validation was still compensated after it
    assert_eq!(saga.compensation_failures().len(), 1);
    assert_eq!(saga.compensation_failures()[0].step, STEP_RESERVE_INVENTORY);
    assert_eq!(saga.compensated_steps(), &[STEP_VALIDATE_ORDER]);
    assert_eq!(h.inventory.reservation_count(), 1);
}

#[tokio::test]
async fn test_compensation_skips_steps_without_compensation() {
    let journal: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let orchestrator = SagaOrchestrator::new();

    let compensate = |name: &'static str| {
        let journal = Arc::clone(&journal);
        move |_ctx: SagaContext| {
            let journal = Arc::clone(&journal);
            async move {
                journal.lock().unwrap().push(name);
                Ok(())
            }
        }
    };

    orchestrator
        .register_saga(
            SagaDefinition::new("abcd")
                .step(
                    SagaStep::new("a", |_ctx| async { Ok(SagaContext::new()) })
                        .with_compensation(compensate("a")),
                )
                .step(SagaStep::new("b", |_ctx| async { Ok(SagaContext::new()) }))
                .step(
                    SagaStep::new("c", |_ctx| async { Ok(SagaContext::new()) })
                        .with_compensation(|_ctx| async { Err(StepError::failed("stuck")) }),
                )
                .step(SagaStep::new("d", |_ctx| async {
                    Err(StepError::failed("d failed"))
                })),
        )
        .await
        .unwrap();

    let saga_id = orchestrator
        .start_saga("abcd", SagaContext::new())
        .await
        .unwrap();

    let saga = orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(saga.completed_steps(), &["a", "b", "c"]);
    // c errored, b has no compensation, a ran last
    assert_eq!(saga.compensated_steps(), &["a"]);
    assert_eq!(saga.compensation_failures()[0].step, "c");
    assert_eq!(*journal.lock().unwrap(), vec!["a"]);
}

#[tokio::test]
async fn test_status_reads_never_observe_partial_step_results() {
    let orchestrator = SagaOrchestrator::new();
    orchestrator
        .register_saga(
            SagaDefinition::new("slow")
                .step(SagaStep::new("first", |_ctx| async {
                    let mut update = SagaContext::new();
                    update.insert("first".to_string(), json!(true));
                    Ok(update)
                }))
                .step(SagaStep::new("second", |mut ctx| async move {
                    // Scribble on the step's own copy, then take a while.
                    ctx.insert("scratch".to_string(), json!("half-done"));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let mut update = SagaContext::new();
                    update.insert("second".to_string(), json!(true));
                    Ok(update)
                })),
        )
        .await
        .unwrap();

    let saga_id = orchestrator
        .spawn_saga("slow", SagaContext::new())
        .await
        .unwrap();

    let mut polls = 0;
    loop {
        let saga = orchestrator.get_saga_status(saga_id).await.unwrap();
        let ctx = saga.context();

        assert!(ctx.get("scratch").is_none());
        // Context keys track completed steps exactly
        assert_eq!(ctx.contains_key("first"), !saga.completed_steps().is_empty());
        assert_eq!(ctx.contains_key("second"), saga.completed_steps().len() >= 2);

        polls += 1;
        if saga.status().is_terminal() {
            assert_eq!(saga.status(), SagaStatus::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(polls > 1);
}

#[tokio::test]
async fn test_concurrent_independent_sagas() {
    let h = TestHarness::new().await;
    let mut notifications = h.orchestrator.subscribe();

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = h
            .orchestrator
            .spawn_saga(order_fulfillment::SAGA_TYPE, full_order(&format!("o{i}")))
            .await
            .unwrap();
        ids.push(id);
    }

    let mut completed = Vec::new();
    while completed.len() < ids.len() {
        match tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .unwrap()
            .unwrap()
        {
            SagaNotification::Completed { saga_id, .. } => completed.push(saga_id),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    for id in &ids {
        assert!(completed.contains(id));
        let saga = h.orchestrator.get_saga_status(*id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Completed);
    }

    let stats = h.orchestrator.stats().await;
    assert_eq!(stats.total, 5);
    assert_eq!(stats.completed, 5);
    assert_eq!(h.inventory.reservation_count(), 5);
    assert_eq!(h.payment.payment_count(), 5);
}

#[tokio::test]
async fn test_one_saga_fails_other_succeeds() {
    let h = TestHarness::new().await;

    let saga_id_1 = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, full_order("o1"))
        .await
        .unwrap();

    h.payment.set_fail_on_charge(true);
    let saga_id_2 = h
        .orchestrator
        .start_saga(order_fulfillment::SAGA_TYPE, full_order("o2"))
        .await
        .unwrap();

    let saga1 = h.orchestrator.get_saga_status(saga_id_1).await.unwrap();
    let saga2 = h.orchestrator.get_saga_status(saga_id_2).await.unwrap();

    assert_eq!(saga1.status(), SagaStatus::Completed);
    assert_eq!(saga2.status(), SagaStatus::Compensated);

    // First saga's records remain; second saga's were compensated
    assert_eq!(h.inventory.reservation_count(), 1);
    assert_eq!(h.payment.payment_count(), 1);
}
