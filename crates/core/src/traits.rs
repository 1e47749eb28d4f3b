//! Seams between the consumer loop and its collaborators.
//!
//! The consumer never subclasses anything: the downstream target
//! implements [`Committer`], and optional per-item rewriting implements
//! [`PrepareHook`]. Both are injected when the consumer is attached.

use crate::error::Result;
use crate::types::{AddOperation, CommitOperation, DeleteOperation};

/// Downstream target performing the actual remote write.
///
/// `Ok(true)` means every operation in the unit was durably applied and
/// the queue may drop it. `Ok(false)` means none were applied for an
/// expected business reason (network hiccup, target rejection); the unit
/// stays retryable. `Err` is reserved for unexpected conditions and is
/// treated as a failure for item disposition, but additionally surfaced
/// to the operator log.
pub trait Committer: Send {
    /// Apply a single operation.
    ///
    /// # Errors
    ///
    /// Only for programmer errors; expected failures return `Ok(false)`.
    fn commit(&mut self, op: &CommitOperation) -> Result<bool>;

    /// Apply a window of operations as one request.
    ///
    /// The default forwards operations to [`Committer::commit`] one at a
    /// time and reports the window failed as soon as one operation does.
    /// With at-least-once semantics a partially applied window is safe:
    /// the whole window is redelivered. Targets with a native bulk API
    /// should override this.
    ///
    /// # Errors
    ///
    /// Same contract as [`Committer::commit`].
    fn commit_batch(&mut self, ops: &[CommitOperation]) -> Result<bool> {
        for op in ops {
            if !self.commit(op)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Per-item rewriting executed before the commit hook.
///
/// Hooks may rewrite reference, content or metadata (e.g. field mapping
/// between source and target schemas). They run once per item and have
/// no visibility into the queue. Defaults are identity.
pub trait PrepareHook: Send {
    /// Rewrite an add operation before commit.
    fn prepare_addition(&mut self, op: AddOperation) -> AddOperation {
        op
    }

    /// Rewrite a delete operation before commit.
    fn prepare_deletion(&mut self, op: DeleteOperation) -> DeleteOperation {
        op
    }
}

/// Prepare hook that passes operations through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPrepare;

impl PrepareHook for IdentityPrepare {}
