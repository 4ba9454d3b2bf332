//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use outbox::{OutboxConfig, RetryPolicy};
use saga::SagaConfig;
use two_phase_commit::CoordinatorConfig;

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `OUTBOX_POLL_INTERVAL_MS`: relay sweep interval (default: `1000`)
/// - `OUTBOX_BATCH_SIZE`: events per sweep (default: `10`)
/// - `OUTBOX_MAX_RETRIES`: attempts before an event is parked (default: `5`)
/// - `OUTBOX_RETRY_DELAY_MS`: wait after a failed attempt (default: `5000`)
/// - `SAGA_STEP_TIMEOUT_MS`: per-step deadline, unset for none
/// - `TWO_PC_TIMEOUT_SECS`: 2PC round deadline (default: `30`)
/// - `COORDINATOR_ID`: 2PC coordinator ID (default: `"main-coordinator"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_max_retries: u32,
    pub outbox_retry_delay: Duration,
    pub saga_step_timeout: Option<Duration>,
    pub two_pc_timeout: Duration,
    pub coordinator_id: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            outbox_poll_interval: env_parse::<u64>("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            outbox_batch_size: env_parse::<usize>("OUTBOX_BATCH_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.outbox_batch_size),
            outbox_max_retries: env_parse("OUTBOX_MAX_RETRIES")
                .unwrap_or(defaults.outbox_max_retries),
            outbox_retry_delay: env_parse::<u64>("OUTBOX_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_retry_delay),
            saga_step_timeout: env_parse::<u64>("SAGA_STEP_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .or(defaults.saga_step_timeout),
            two_pc_timeout: env_parse::<u64>("TWO_PC_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.two_pc_timeout),
            coordinator_id: std::env::var("COORDINATOR_ID").unwrap_or(defaults.coordinator_id),
        }
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            step_timeout: self.saga_step_timeout,
            ..SagaConfig::default()
        }
    }

    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            poll_interval: self.outbox_poll_interval,
            batch_size: self.outbox_batch_size,
            retry: RetryPolicy {
                max_retries: self.outbox_max_retries,
                retry_delay: self.outbox_retry_delay,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new(self.coordinator_id.clone()).with_timeout(self.two_pc_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        let outbox = OutboxConfig::default();
        let coordinator = CoordinatorConfig::default();
        Self {
            log_level: "info".to_string(),
            outbox_poll_interval: outbox.poll_interval,
            outbox_batch_size: outbox.batch_size,
            outbox_max_retries: outbox.retry.max_retries,
            outbox_retry_delay: outbox.retry.retry_delay,
            saga_step_timeout: None,
            two_pc_timeout: coordinator.timeout,
            coordinator_id: coordinator.coordinator_id,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
