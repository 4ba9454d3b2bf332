//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::StepError;

/// Result of a successful inventory reservation.
#[derive(Debug, Clone)]
pub struct ReservationResult {
    /// The reservation ID assigned by the inventory service.
    pub reservation_id: String,
}

/// Trait for inventory management operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves `quantity` units of an item for an order.
    async fn reserve(
        &self,
        order_id: &str,
        item_id: &str,
        quantity: u64,
    ) -> Result<ReservationResult, StepError>;

    /// Releases a previously made reservation.
    async fn release(&self, reservation_id: &str) -> Result<(), StepError>;
}

#[derive(Debug, Clone)]
struct Reservation {
    order_id: String,
    item_id: String,
    quantity: u64,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, Reservation>,
    next_id: u32,
    fail_on_reserve: bool,
    fail_on_release: bool,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on reserve calls.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reserve = fail;
    }

    /// Configures the service to fail on release calls.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.state.write().unwrap().fail_on_release = fail;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .reservations
            .contains_key(reservation_id)
    }

    /// Returns the total quantity reserved for an item across all orders.
    pub fn reserved_quantity(&self, item_id: &str) -> u64 {
        self.state
            .read()
            .unwrap()
            .reservations
            .values()
            .filter(|r| r.item_id == item_id)
            .map(|r| r.quantity)
            .sum()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        order_id: &str,
        item_id: &str,
        quantity: u64,
    ) -> Result<ReservationResult, StepError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_reserve {
            return Err(StepError::failed("Insufficient stock"));
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state.reservations.insert(
            reservation_id.clone(),
            Reservation {
                order_id: order_id.to_string(),
                item_id: item_id.to_string(),
                quantity,
            },
        );
        tracing::debug!(%reservation_id, order_id, item_id, quantity, "inventory reserved");

        Ok(ReservationResult { reservation_id })
    }

    async fn release(&self, reservation_id: &str) -> Result<(), StepError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_release {
            return Err(StepError::failed("Inventory service unavailable"));
        }

        if let Some(reservation) = state.reservations.remove(reservation_id) {
            tracing::debug!(
                reservation_id,
                order_id = %reservation.order_id,
                "inventory released"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_and_release() {
        let service = InMemoryInventoryService::new();

        let result = service.reserve("o1", "SKU-001", 3).await.unwrap();
        assert!(result.reservation_id.starts_with("RES-"));
        assert_eq!(service.reservation_count(), 1);
        assert_eq!(service.reserved_quantity("SKU-001"), 3);
        assert!(service.has_reservation(&result.reservation_id));

        service.release(&result.reservation_id).await.unwrap();
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_on_reserve() {
        let service = InMemoryInventoryService::new();
        service.set_fail_on_reserve(true);

        let result = service.reserve("o1", "SKU-001", 1).await;
        assert!(result.is_err());
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let service = InMemoryInventoryService::new();
        let result = service.reserve("o1", "SKU-001", 1).await.unwrap();

        service.release(&result.reservation_id).await.unwrap();
        service.release(&result.reservation_id).await.unwrap();
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_on_release_keeps_reservation() {
        let service = InMemoryInventoryService::new();
        let result = service.reserve("o1", "SKU-001", 1).await.unwrap();
        service.set_fail_on_release(true);

        assert!(service.release(&result.reservation_id).await.is_err());
        assert!(service.has_reservation(&result.reservation_id));
    }
}
