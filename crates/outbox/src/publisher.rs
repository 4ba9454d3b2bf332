//! Event publisher trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PublishError;

/// Destination the relay delivers outbox events to.
///
/// Returning `Ok` acknowledges the event; the relay then marks it
/// processed. Any error leaves it pending for a later sweep.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event_type: &str, payload: &Value) -> Result<(), PublishError>;
}

/// Callback invoked for every event of a subscribed type.
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

#[derive(Default)]
struct InMemoryPublisherState {
    handlers: HashMap<String, Vec<EventHandler>>,
    published: Vec<(String, Value)>,
    attempts: u64,
    fail_remaining: u32,
    fail_always: bool,
}

/// In-memory publisher that fans events out to local handlers.
///
/// A handler error fails the whole publish, so the event will be
/// redelivered to every handler on the next attempt.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryEventPublisher {
    /// Creates a publisher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.state
            .write()
            .unwrap()
            .handlers
            .entry(event_type.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Fails the next `count` publish attempts.
    pub fn fail_next(&self, count: u32) {
        self.state.write().unwrap().fail_remaining = count;
    }

    /// Configures the publisher to fail every attempt.
    pub fn set_fail_always(&self, fail: bool) {
        self.state.write().unwrap().fail_always = fail;
    }

    /// Returns every acknowledged event, in publish order.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.state.read().unwrap().published.clone()
    }

    /// Returns the number of acknowledged events.
    pub fn published_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }

    /// Returns the number of publish attempts, including failures.
    pub fn attempt_count(&self) -> u64 {
        self.state.read().unwrap().attempts
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event_type: &str, payload: &Value) -> Result<(), PublishError> {
        let handlers = {
            let mut state = self.state.write().unwrap();
            state.attempts += 1;

            if state.fail_always {
                return Err(PublishError::new(event_type, "broker unavailable"));
            }
            if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                return Err(PublishError::new(event_type, "broker unavailable"));
            }

            state.handlers.get(event_type).cloned().unwrap_or_default()
        };

        for handler in &handlers {
            handler(payload).map_err(|reason| PublishError::new(event_type, reason))?;
        }

        self.state
            .write()
            .unwrap()
            .published
            .push((event_type.to_string(), payload.clone()));
        Ok(())
    }
}
