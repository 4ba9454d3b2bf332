//! Orchestrator configuration.

use std::time::Duration;

/// Default capacity of the notification broadcast channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Configuration for the saga orchestrator.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Deadline applied to every `execute` and `compensate` call.
    /// `None` lets steps run unbounded.
    pub step_timeout: Option<Duration>,
    /// Buffered notifications per subscriber before it starts lagging.
    pub notification_capacity: usize,
}

impl SagaConfig {
    /// Sets the per-step deadline.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: None,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SagaConfig::default();
        assert!(config.step_timeout.is_none());
        assert_eq!(config.notification_capacity, 256);
    }

    #[test]
    fn test_with_step_timeout() {
        let config = SagaConfig::default().with_step_timeout(Duration::from_secs(2));
        assert_eq!(config.step_timeout, Some(Duration::from_secs(2)));
    }
}
