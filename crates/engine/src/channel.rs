//! Producer-facing commit channel.
//!
//! Turns `add`/`remove` calls into encoded operations and pushes them
//! into the durable queue. There is no in-memory fast path: every call
//! lands durably before it returns, because the queue *is* the buffer
//! between producer and consumer. `commit()` signals end of session; it
//! never blocks on drain.

use spool_core::{codec, AddOperation, CommitOperation, DeleteOperation, EntryId, Metadata, Result};
use spool_storage::DurableQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared producer/consumer session state.
///
/// The completion flag is session-scoped, not persisted: reopening a
/// queue directory starts a fresh session with a fresh channel and
/// consumer pairing.
#[derive(Debug, Default)]
pub(crate) struct Session {
    completed: AtomicBool,
}

impl Session {
    pub(crate) fn complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Handle producers use to push work into a queue.
///
/// Cloneable and safe to use from many threads concurrently; each call
/// is independently durable, and ordering between concurrent callers is
/// the order their enqueues durably land.
#[derive(Clone)]
pub struct CommitChannel {
    queue: Arc<DurableQueue>,
    session: Arc<Session>,
}

impl CommitChannel {
    pub(crate) fn new(queue: Arc<DurableQueue>, session: Arc<Session>) -> Self {
        CommitChannel { queue, session }
    }

    /// Queue an upsert of `reference` with the given content and
    /// metadata.
    ///
    /// # Errors
    ///
    /// [`spool_core::Error::Io`] if the enqueue cannot be made durable,
    /// or a codec error if the operation cannot be encoded.
    pub fn add(
        &self,
        reference: impl Into<String>,
        content: Vec<u8>,
        metadata: Metadata,
    ) -> Result<EntryId> {
        let op = CommitOperation::Add(AddOperation::new(reference, content, metadata));
        self.push(op)
    }

    /// Queue a deletion of `reference`.
    ///
    /// # Errors
    ///
    /// Same contract as [`CommitChannel::add`].
    pub fn remove(&self, reference: impl Into<String>, metadata: Metadata) -> Result<EntryId> {
        let op = CommitOperation::Delete(DeleteOperation::new(reference, metadata));
        self.push(op)
    }

    /// Signal that no further items will be produced in this session.
    ///
    /// Does not block: the consumer observes the flag and transitions to
    /// `Completed` once Main is exhausted.
    pub fn commit(&self) {
        info!(queue = %self.queue.name(), "commit signalled, channel half-closed");
        self.session.complete();
    }

    /// Whether `commit()` has been signalled.
    pub fn is_completed(&self) -> bool {
        self.session.is_completed()
    }

    fn push(&self, op: CommitOperation) -> Result<EntryId> {
        let bytes = codec::encode(&op)?;
        let id = self.queue.enqueue(&bytes)?;
        debug!(
            queue = %self.queue.name(),
            %id,
            reference = op.reference(),
            "queued commit operation"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn channel(dir: &std::path::Path) -> (CommitChannel, Arc<DurableQueue>) {
        let queue = Arc::new(DurableQueue::open(dir, "chan").unwrap());
        let session = Arc::new(Session::default());
        (CommitChannel::new(queue.clone(), session), queue)
    }

    #[test]
    fn add_lands_durably_in_main() {
        let dir = tempdir().unwrap();
        let (chan, queue) = channel(dir.path());

        chan.add("doc-1", b"content".to_vec(), Metadata::new()).unwrap();
        chan.remove("doc-2", Metadata::new()).unwrap();

        assert_eq!(queue.size(), 2);

        let entry = queue.try_dequeue().unwrap().unwrap();
        let op = codec::decode(&entry.payload).unwrap();
        assert_eq!(op.reference(), "doc-1");
        assert!(matches!(op, CommitOperation::Add(_)));
    }

    #[test]
    fn commit_flips_completion_without_draining() {
        let dir = tempdir().unwrap();
        let (chan, queue) = channel(dir.path());

        chan.add("doc", b"x".to_vec(), Metadata::new()).unwrap();
        assert!(!chan.is_completed());
        chan.commit();
        assert!(chan.is_completed());
        // Items are still queued; commit does not drain.
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn concurrent_producers_each_land() {
        let dir = tempdir().unwrap();
        let (chan, queue) = channel(dir.path());

        let mut handles = Vec::new();
        for t in 0..4 {
            let chan = chan.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    chan.add(format!("doc-{t}-{i}"), b"c".to_vec(), Metadata::new())
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.size(), 40);
    }
}
