//! Saga orchestrator for multi-step operations with compensation.
//!
//! A saga is a named, ordered list of steps registered once with the
//! [`SagaOrchestrator`]. Starting a saga runs its steps one at a time
//! against a shared context, merging each step's output into it. If a step
//! fails, every step that already completed is compensated in reverse
//! order, and the instance ends `Compensated`.
//!
//! ```text
//! Started ──► InProgress ──┬──► Completed
//!                          └──► Failed ──► Compensating ──► Compensated
//! ```

pub mod config;
pub mod definition;
pub mod error;
pub mod events;
pub mod instance;
pub mod orchestrator;
pub mod order_fulfillment;
pub mod services;
pub mod state;

pub use config::SagaConfig;
pub use definition::{SagaContext, SagaDefinition, SagaStep, StepResult};
pub use error::{SagaError, StepError};
pub use events::{SagaEvent, SagaNotification};
pub use instance::{CompensationFailure, SagaInstance};
pub use orchestrator::{SagaOrchestrator, SagaStats};
pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InventoryService, PaymentResult,
    PaymentService, ReservationResult,
};
pub use state::SagaStatus;
