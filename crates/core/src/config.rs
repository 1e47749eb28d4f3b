//! Consumer configuration.
//!
//! Validation happens up front, when the consumer is attached, so a bad
//! batch size or queue name fails before any item is processed.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default number of entries per commit batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default number of in-process retries before a unit is requeued.
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default first backoff step between retries.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default cap on the backoff between retries.
pub const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(30);

/// Default interval at which the blocked consumer re-checks for work
/// and for the completion signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration rejected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Batch size must be at least 1.
    #[error("invalid batch size {0}: must be at least 1")]
    InvalidBatchSize(usize),

    /// Poll interval must be non-zero.
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    /// Queue names become directory names and must be plain.
    #[error("invalid queue name {0:?}: must be non-empty, without path separators")]
    InvalidQueueName(String),

    /// A queue supports exactly one consumer loop.
    #[error("a consumer is already attached to this queue")]
    ConsumerAlreadyAttached,
}

/// Settings for one pull consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Entries per commit window. 1 selects single-operation commits.
    pub batch_size: usize,
    /// In-process retries before the unit is requeued. 0 fails fast.
    pub max_retries: u32,
    /// First backoff step; doubles per attempt.
    pub initial_backoff: Duration,
    /// Cap on any single backoff wait.
    pub max_retry_wait: Duration,
    /// How long one blocking dequeue waits before re-checking state.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ConsumerConfig {
    /// Set the commit window size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the in-process retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_retry_wait(mut self, max_retry_wait: Duration) -> Self {
        self.max_retry_wait = max_retry_wait;
        self
    }

    /// Set the first backoff step.
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Set the blocking-dequeue poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}

/// Check a queue name is usable as a directory name.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidQueueName`] for empty names or names
/// containing path separators or traversal components.
pub fn validate_queue_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(ConfigError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}
