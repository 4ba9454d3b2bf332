//! Example order fulfillment saga.
//!
//! ```text
//! validate_order ──► reserve_inventory ──► process_payment
//! ```
//!
//! Context keys read: `order_id` (required), `item_id` (required by
//! `reserve_inventory`), `quantity` (default 1), `amount` in cents
//! (must be positive). Keys written: `validated`, `reserved`,
//! `reservation_id`, `payment_processed`, `payment_id`.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::definition::{SagaContext, SagaDefinition, SagaStep};
use crate::error::StepError;
use crate::services::{InventoryService, PaymentService};

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "order";

/// Step name: Validate the order request.
pub const STEP_VALIDATE_ORDER: &str = "validate_order";

/// Step name: Reserve inventory for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Process payment for the order.
pub const STEP_PROCESS_PAYMENT: &str = "process_payment";

/// Builds the order fulfillment saga over the given services.
pub fn definition<I, P>(inventory: I, payment: P) -> SagaDefinition
where
    I: InventoryService + 'static,
    P: PaymentService + 'static,
{
    let inventory = Arc::new(inventory);
    let payment = Arc::new(payment);

    SagaDefinition::new(SAGA_TYPE)
        .step(validate_order())
        .step(reserve_inventory(inventory))
        .step(process_payment(payment))
}

fn validate_order() -> SagaStep {
    SagaStep::new(STEP_VALIDATE_ORDER, |ctx| async move {
        let order_id = required_str(&ctx, "order_id")?;
        tracing::info!(order_id, "order validated");
        Ok(update([("validated", json!(true))]))
    })
    .with_compensation(|ctx| async move {
        tracing::info!(
            order_id = ctx.get("order_id").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "order validation compensated"
        );
        Ok(())
    })
}

fn reserve_inventory<I>(inventory: Arc<I>) -> SagaStep
where
    I: InventoryService + 'static,
{
    let release = Arc::clone(&inventory);

    SagaStep::new(STEP_RESERVE_INVENTORY, move |ctx| {
        let inventory = Arc::clone(&inventory);
        async move {
            let order_id = required_str(&ctx, "order_id")?;
            let item_id = required_str(&ctx, "item_id")?;
            let quantity = ctx.get("quantity").and_then(Value::as_u64).unwrap_or(1);

            let result = inventory.reserve(order_id, item_id, quantity).await?;
            Ok(update([
                ("reserved", json!(true)),
                ("reservation_id", json!(result.reservation_id)),
            ]))
        }
    })
    .with_compensation(move |ctx| {
        let inventory = Arc::clone(&release);
        async move {
            if let Some(reservation_id) = ctx.get("reservation_id").and_then(Value::as_str) {
                inventory.release(reservation_id).await?;
                tracing::info!(reservation_id, "released inventory reservation");
            }
            Ok(())
        }
    })
}

fn process_payment<P>(payment: Arc<P>) -> SagaStep
where
    P: PaymentService + 'static,
{
    let refund = Arc::clone(&payment);

    SagaStep::new(STEP_PROCESS_PAYMENT, move |ctx| {
        let payment = Arc::clone(&payment);
        async move {
            let order_id = required_str(&ctx, "order_id")?;
            let amount = ctx
                .get("amount")
                .and_then(Value::as_u64)
                .filter(|amount| *amount > 0)
                .ok_or_else(|| StepError::failed("Invalid payment amount"))?;

            let result = payment.charge(order_id, amount).await?;
            Ok(update([
                ("payment_processed", json!(true)),
                ("payment_id", json!(result.payment_id)),
            ]))
        }
    })
    .with_compensation(move |ctx| {
        let payment = Arc::clone(&refund);
        async move {
            if let Some(payment_id) = ctx.get("payment_id").and_then(Value::as_str) {
                payment.refund(payment_id).await?;
                tracing::info!(payment_id, "refunded payment");
            }
            Ok(())
        }
    })
}

fn required_str<'a>(ctx: &'a SagaContext, key: &str) -> Result<&'a str, StepError> {
    ctx.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::failed(format!("{key} is required")))
}

fn update<const N: usize>(pairs: [(&str, Value); N]) -> SagaContext {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
