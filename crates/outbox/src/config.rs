//! Relay configuration and retry policy.

use std::time::Duration;

/// How the wait between publish attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Every retry waits `retry_delay`.
    Fixed,
    /// The wait doubles after each failed attempt, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

/// Retry rules applied to events whose publish failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an event is parked until
    /// `retry_failed_events` is called.
    pub max_retries: u32,
    /// Minimum wait after a failed attempt before the next one.
    pub retry_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Returns the wait required after `attempts` attempts.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Exponential { max_delay } => {
                let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
                self.retry_delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }
}

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Interval between background sweeps.
    pub poll_interval: Duration,
    /// Maximum events handled per sweep.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            retry: RetryPolicy::default(),
        }
    }
}
