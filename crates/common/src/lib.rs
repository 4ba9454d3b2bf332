//! Shared identifier types for the transaction coordination crates.

pub mod types;

pub use types::{EventId, SagaId, TransactionId};
