//! Bounded-attempt, capped-backoff retry policy.
//!
//! Wraps a single commit attempt inside the consumer's `Processing`
//! state: on failure the consumer waits `backoff(attempt)` and tries
//! again, up to `max_retries` extra attempts, before the unit is
//! requeued for later redelivery. This composes with, and is orthogonal
//! to, the queue-level requeue-on-failure behavior.

use spool_core::ConsumerConfig;
use std::time::Duration;

/// Retry schedule for failed commit attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_retry_wait: Duration,
}

impl RetryPolicy {
    /// Create a policy with `max_retries` extra attempts, starting at
    /// `initial_backoff` and doubling per attempt up to `max_retry_wait`.
    pub fn new(max_retries: u32, initial_backoff: Duration, max_retry_wait: Duration) -> Self {
        RetryPolicy {
            max_retries,
            initial_backoff,
            max_retry_wait,
        }
    }

    /// No in-process retry: fail fast to requeue.
    pub fn no_retry() -> Self {
        RetryPolicy::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Derive the policy from a consumer configuration.
    pub fn from_config(config: &ConsumerConfig) -> Self {
        RetryPolicy::new(
            config.max_retries,
            config.initial_backoff,
            config.max_retry_wait,
        )
    }

    /// Extra attempts allowed after the first failure.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait before retry number `attempt` (zero-based):
    /// `min(initial_backoff * 2^attempt, max_retry_wait)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut wait = self.initial_backoff;
        for _ in 0..attempt {
            if wait >= self.max_retry_wait {
                return self.max_retry_wait;
            }
            wait = wait.saturating_mul(2);
        }
        wait.min(self.max_retry_wait)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&ConsumerConfig::default())
    }
}
