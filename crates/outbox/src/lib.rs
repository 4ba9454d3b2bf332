//! Transactional outbox.
//!
//! Events are staged in an [`OutboxRepository`] alongside business writes
//! and relayed to an [`EventPublisher`] by an [`OutboxRelay`]. Delivery is
//! at-least-once: an event is marked processed only after the publisher
//! acknowledges it, so subscribers must tolerate duplicates.

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod publisher;
pub mod relay;
pub mod repository;

pub use config::{Backoff, OutboxConfig, RetryPolicy};
pub use error::{OutboxError, PublishError, Result};
pub use event::OutboxEvent;
pub use memory::InMemoryOutboxRepository;
pub use publisher::{EventHandler, EventPublisher, InMemoryEventPublisher};
pub use relay::{OutboxRelay, OutboxStats, SweepReport};
pub use repository::OutboxRepository;
