//! Core types and traits for Spool
//!
//! This crate defines the foundational pieces shared by the storage and
//! engine layers:
//! - CommitOperation: the add/delete instructions flowing through a queue
//! - Metadata: insertion-ordered multi-valued document metadata
//! - EntryId / QueueEntry: storage-assigned queue identities
//! - codec: the versioned wire format for operations at rest
//! - Error taxonomy: codec, storage, configuration and committer failures
//! - Traits: the Committer and PrepareHook seams for downstream targets

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use codec::{CodecError, CODEC_FORMAT_VERSION};
pub use config::{validate_queue_name, ConfigError, ConsumerConfig, DEFAULT_BATCH_SIZE};
pub use error::{Error, Result};
pub use traits::{Committer, IdentityPrepare, PrepareHook};
pub use types::{AddOperation, CommitOperation, DeleteOperation, EntryId, Metadata, QueueEntry};
