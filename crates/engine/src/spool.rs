//! Top-level facade tying the queue, channel and consumer together.
//!
//! A [`Spool`] owns one durable queue directory, hands out producer
//! channels, and runs at most one consumer on a background thread.
//! Orphan recovery happens inside [`Spool::open`], before anything can
//! dequeue, so entries stranded in flight by a crash are always back in
//! Main before the first pull.

use crate::channel::{CommitChannel, Session};
use crate::consumer::{ConsumerCounters, PullConsumer, SharedCounters};
use crate::retry::RetryPolicy;
use spool_core::{
    Committer, ConfigError, ConsumerConfig, EntryId, Error, Metadata, PrepareHook, Result,
};
use spool_storage::DurableQueue;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

/// Point-in-time region sizes for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries in Main, awaiting delivery.
    pub pending: usize,
    /// Entries in Ephemeral, pulled but not yet acknowledged.
    pub in_flight: usize,
    /// Entries quarantined as undecodable.
    pub dead_letter: usize,
}

/// Handle to a consumer running on a background thread.
pub struct ConsumerHandle {
    thread: JoinHandle<Result<()>>,
    counters: Arc<SharedCounters>,
}

impl ConsumerHandle {
    /// Block until the consumer terminates and return its outcome.
    ///
    /// # Errors
    ///
    /// The consumer's fatal error, if it stopped on one.
    pub fn join(self) -> Result<()> {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConsumerPanicked),
        }
    }

    /// Snapshot of the consumer's activity counters.
    pub fn counters(&self) -> ConsumerCounters {
        self.counters.snapshot()
    }

    /// Whether the consumer thread has terminated.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// A named, durable commit queue with one producer channel and at most
/// one consumer.
pub struct Spool {
    queue: Arc<DurableQueue>,
    session: Arc<Session>,
    channel: CommitChannel,
    consumer_attached: AtomicBool,
}

impl Spool {
    /// Open (or create) the queue named `name` under `dir` and recover
    /// any entries a previous process left in flight.
    ///
    /// # Errors
    ///
    /// [`Error::QueueLocked`] if another process owns the directory,
    /// [`Error::Corruption`] if the on-disk manifest does not match, or
    /// [`Error::Io`] for filesystem failures.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let queue = Arc::new(DurableQueue::open(dir.as_ref(), name)?);
        let recovered = queue.recover_orphans()?;
        if recovered > 0 {
            info!(queue = %queue.name(), recovered, "recovered in-flight entries from previous run");
        }
        let session = Arc::new(Session::default());
        let channel = CommitChannel::new(queue.clone(), session.clone());
        Ok(Spool {
            queue,
            session,
            channel,
            consumer_attached: AtomicBool::new(false),
        })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Queue an upsert of `reference`.
    ///
    /// # Errors
    ///
    /// Same contract as [`CommitChannel::add`].
    pub fn add(
        &self,
        reference: impl Into<String>,
        content: Vec<u8>,
        metadata: Metadata,
    ) -> Result<EntryId> {
        self.channel.add(reference, content, metadata)
    }

    /// Queue a deletion of `reference`.
    ///
    /// # Errors
    ///
    /// Same contract as [`CommitChannel::remove`].
    pub fn remove(&self, reference: impl Into<String>, metadata: Metadata) -> Result<EntryId> {
        self.channel.remove(reference, metadata)
    }

    /// Signal end of the production session.
    pub fn commit(&self) {
        self.channel.commit();
    }

    /// A cloneable producer channel for this queue.
    pub fn channel(&self) -> CommitChannel {
        self.channel.clone()
    }

    /// Spawn the consumer loop on a background thread.
    ///
    /// At most one consumer may be attached per spool; the loop runs
    /// until [`Spool::commit`] is signalled and the queue drains.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if `config` is invalid or a consumer is already
    /// attached.
    pub fn attach_consumer(
        &self,
        config: ConsumerConfig,
        prepare: Box<dyn PrepareHook>,
        committer: Box<dyn Committer>,
    ) -> Result<ConsumerHandle> {
        config.validate()?;
        if self.consumer_attached.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::ConsumerAlreadyAttached.into());
        }

        let retry = RetryPolicy::from_config(&config);
        let mut consumer = PullConsumer::new(
            self.queue.clone(),
            self.session.clone(),
            config,
            prepare,
            committer,
            retry,
        );
        let counters = consumer.counters();
        let thread = thread::Builder::new()
            .name(format!("spool-consumer-{}", self.queue.name()))
            .spawn(move || consumer.run())?;
        Ok(ConsumerHandle { thread, counters })
    }

    /// Current region sizes.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.queue.size(),
            in_flight: self.queue.ephemeral_size(),
            dead_letter: self.queue.dead_letter_size(),
        }
    }

    /// Tear down the queue's storage directory.
    ///
    /// All other handles (channels, a consumer) must be dropped first.
    ///
    /// # Errors
    ///
    /// [`Error::QueueBusy`] if live handles remain, or [`Error::Io`] if
    /// the directory cannot be removed.
    pub fn destroy(self) -> Result<()> {
        let Spool {
            queue,
            session,
            channel,
            ..
        } = self;
        drop(channel);
        drop(session);
        match Arc::try_unwrap(queue) {
            Ok(queue) => queue.destroy(),
            Err(queue) => Err(Error::QueueBusy(queue.name().to_string())),
        }
    }
}
