//! Commit engine: session channel, pull consumer and retry policy on
//! top of the durable queue.
//!
//! The engine wires the storage layer to user-provided hooks. Producers
//! push through a [`CommitChannel`]; a single [`PullConsumer`] pulls
//! units of work, runs the [`spool_core::Committer`] hook, and settles
//! each unit by acknowledging or requeueing. [`Spool`] is the one-stop
//! handle most callers want.

#![warn(missing_docs)]

mod channel;
mod consumer;
mod retry;
mod spool;

pub use channel::CommitChannel;
pub use consumer::{ConsumerCounters, ConsumerState, PullConsumer};
pub use retry::RetryPolicy;
pub use spool::{ConsumerHandle, QueueStats, Spool};

pub use spool_core::{
    codec, validate_queue_name, AddOperation, CodecError, CommitOperation, Committer, ConfigError,
    ConsumerConfig, DeleteOperation, EntryId, Error, IdentityPrepare, Metadata, PrepareHook,
    QueueEntry, Result, DEFAULT_BATCH_SIZE,
};
pub use spool_storage::DurableQueue;
