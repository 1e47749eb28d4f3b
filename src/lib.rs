//! Spool - Durable commit queue for downstream document targets
//!
//! Spool buffers document additions and deletions in a crash-safe,
//! on-disk FIFO queue and delivers them to a user-provided committer
//! with at-least-once semantics.
//!
//! # Quick Start
//!
//! ```ignore
//! use spool::{Spool, Metadata, Committer, CommitOperation, ConsumerConfig, IdentityPrepare, Result};
//!
//! struct Printer;
//! impl Committer for Printer {
//!     fn commit(&mut self, op: &CommitOperation) -> Result<bool> {
//!         println!("{}", op.reference());
//!         Ok(true)
//!     }
//! }
//!
//! // Open (or create) a queue, produce, and drain it.
//! let spool = Spool::open("/var/spool/docs", "crawl")?;
//! spool.add("https://example.com/a", b"content".to_vec(), Metadata::new())?;
//! spool.remove("https://example.com/b", Metadata::new())?;
//! spool.commit();
//!
//! let handle = spool.attach_consumer(
//!     ConsumerConfig::default(),
//!     Box::new(IdentityPrepare),
//!     Box::new(Printer),
//! )?;
//! handle.join()?;
//! ```
//!
//! # Architecture
//!
//! Producers push through a [`CommitChannel`]; every operation lands
//! durably in the queue's Main region before the call returns. A single
//! [`PullConsumer`] moves entries to the Ephemeral region while a unit
//! of work is in flight, and settles each unit by acknowledging or
//! requeueing. Entries left in flight by a crash are recovered on the
//! next open.
//!
//! Internal layers (storage format, locking, the consumer state
//! machine) live in member crates; this crate re-exports the engine's
//! public API.

pub use spool_engine::*;
