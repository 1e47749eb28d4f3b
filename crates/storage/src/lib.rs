//! Durable queue storage for Spool
//!
//! One queue owns one storage directory. Entries live as individual
//! framed files partitioned into two region directories, `main/`
//! (awaiting delivery) and `ephemeral/` (dequeued, awaiting
//! acknowledgement), plus a `dead/` region for quarantined entries.
//! Region membership changes are atomic renames, so every live entry is
//! in exactly one region at any instant, including across crashes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod lock;
pub mod queue;

pub use lock::DirLock;
pub use queue::{DurableQueue, MANIFEST_FILE};
