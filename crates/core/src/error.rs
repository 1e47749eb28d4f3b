//! Error taxonomy for the queue, channel and consumer.
//!
//! Four failure families with distinct policies:
//! - [`CodecError`]: the entry is un-decodable; the consumer quarantines
//!   it and continues.
//! - Storage failures ([`Error::Io`], [`Error::Corruption`],
//!   [`Error::QueueLocked`]): the durable store itself is unusable; never
//!   retried, the consumer stops and the error is surfaced loudly.
//! - [`ConfigError`]: rejected at startup, before any item is processed.
//! - Transient commit failures are not errors at all: a committer reports
//!   them by returning `Ok(false)`, and they stay invisible to producers.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::types::EntryId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared across the queue, channel and consumer layers.
#[derive(Debug, Error)]
pub enum Error {
    /// The durable store is unreadable or unwritable.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted state failed validation (bad manifest, mangled layout).
    #[error("storage corruption: {0}")]
    Corruption(String),

    /// Another process owns the queue's storage directory.
    #[error("queue directory already locked: {0}")]
    QueueLocked(PathBuf),

    /// The queue still has live handles (a consumer or extra channels)
    /// and cannot be torn down.
    #[error("queue \"{0}\" is still in use")]
    QueueBusy(String),

    /// An id was expected in the in-flight region but is not there.
    #[error("entry {0} not found in the in-flight region")]
    EntryNotFound(EntryId),

    /// An operation payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid configuration, rejected before processing starts.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unexpected committer failure (programmer error in the target).
    #[error("committer failure: {0}")]
    Committer(String),

    /// The consumer thread died abnormally instead of returning.
    #[error("consumer thread panicked")]
    ConsumerPanicked,
}
