//! External service traits and in-memory implementations for the order saga.

pub mod inventory;
pub mod payment;

pub use inventory::{InMemoryInventoryService, InventoryService, ReservationResult};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
