use std::time::Duration;

/// Configuration for the two-phase commit coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Identifier stamped on every transaction this coordinator begins.
    pub coordinator_id: String,
    /// Deadline for the prepare round, measured from transaction start.
    /// The commit and abort rounds each get a window of the same length.
    pub timeout: Duration,
}

impl CoordinatorConfig {
    /// Creates a config with the given coordinator ID and default timeout.
    pub fn new(coordinator_id: impl Into<String>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: "main-coordinator".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}
