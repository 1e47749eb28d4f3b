//! Credit-based pull consumer.
//!
//! Exactly one consumer loop runs per queue, strictly sequential: it
//! pulls one unit of work (a single entry or a batch window), runs the
//! preparation and commit hooks, then acknowledges or requeues the whole
//! unit before pulling the next. One outstanding unit at a time is what
//! bounds memory to O(batch size) regardless of queue depth.
//!
//! # State machine
//!
//! ```text
//! Idle → Requesting → Processing → (Acking | Failed) → Idle
//!                                                      ↓
//!                                                  Completed
//! ```
//!
//! `Completed` is terminal: Main is empty, nothing is in flight, and the
//! producer signalled `commit()`. Reopening requires a fresh channel and
//! consumer pairing.

use crate::channel::Session;
use crate::retry::RetryPolicy;
use spool_core::{
    codec, CommitOperation, Committer, ConsumerConfig, EntryId, PrepareHook, QueueEntry, Result,
};
use spool_storage::DurableQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Consumer loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Between units; about to issue a pull request.
    Idle,
    /// Collecting one unit of work from the queue.
    Requesting,
    /// Running prepare and commit hooks for the unit.
    Processing,
    /// Acknowledging a successfully committed unit.
    Acking,
    /// Returning a failed unit to the queue.
    Failed,
    /// Terminal: session complete and queue drained.
    Completed,
}

/// Snapshot of consumer activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerCounters {
    /// Units (windows) committed downstream.
    pub units_committed: u64,
    /// Entries acknowledged and removed from the queue.
    pub entries_acked: u64,
    /// Entries returned to Main after a failed unit.
    pub entries_requeued: u64,
    /// Entries quarantined as undecodable.
    pub entries_quarantined: u64,
    /// In-process commit retries performed.
    pub retries: u64,
}

/// Cumulative counters shared with the consumer handle.
#[derive(Debug, Default)]
pub(crate) struct SharedCounters {
    units_committed: AtomicU64,
    entries_acked: AtomicU64,
    entries_requeued: AtomicU64,
    entries_quarantined: AtomicU64,
    retries: AtomicU64,
}

impl SharedCounters {
    pub(crate) fn snapshot(&self) -> ConsumerCounters {
        ConsumerCounters {
            units_committed: self.units_committed.load(Ordering::Relaxed),
            entries_acked: self.entries_acked.load(Ordering::Relaxed),
            entries_requeued: self.entries_requeued.load(Ordering::Relaxed),
            entries_quarantined: self.entries_quarantined.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Single-writer consumer pulling units of work from a durable queue.
pub struct PullConsumer {
    queue: Arc<DurableQueue>,
    session: Arc<Session>,
    config: ConsumerConfig,
    prepare: Box<dyn PrepareHook>,
    committer: Box<dyn Committer>,
    retry: RetryPolicy,
    state: ConsumerState,
    counters: Arc<SharedCounters>,
}

impl PullConsumer {
    pub(crate) fn new(
        queue: Arc<DurableQueue>,
        session: Arc<Session>,
        config: ConsumerConfig,
        prepare: Box<dyn PrepareHook>,
        committer: Box<dyn Committer>,
        retry: RetryPolicy,
    ) -> Self {
        PullConsumer {
            queue,
            session,
            config,
            prepare,
            committer,
            retry,
            state: ConsumerState::Idle,
            counters: Arc::new(SharedCounters::default()),
        }
    }

    /// Current state, for observation and tests.
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub(crate) fn counters(&self) -> Arc<SharedCounters> {
        self.counters.clone()
    }

    /// Run until the session completes.
    ///
    /// # Errors
    ///
    /// Only fatal storage errors escape; commit failures and undecodable
    /// entries are handled inside the loop.
    pub fn run(&mut self) -> Result<()> {
        info!(queue = %self.queue.name(), batch_size = self.config.batch_size, "consumer started");
        while self.state != ConsumerState::Completed {
            self.step()?;
        }
        info!(queue = %self.queue.name(), "consumer completed");
        Ok(())
    }

    /// Process at most one unit of work: pull, prepare, commit, then
    /// ack or requeue. Returns with the consumer back in `Idle`, or in
    /// `Completed` once the session is drained.
    ///
    /// # Errors
    ///
    /// Fatal storage errors only.
    pub fn step(&mut self) -> Result<()> {
        self.state = ConsumerState::Requesting;
        let window = self.pull_window()?;

        if window.is_empty() {
            if self.session.is_completed() && self.queue.size() == 0 {
                self.state = ConsumerState::Completed;
            } else {
                self.state = ConsumerState::Idle;
            }
            return Ok(());
        }

        self.state = ConsumerState::Processing;
        let unit = self.decode_and_prepare(window)?;
        if unit.is_empty() {
            // Whole window quarantined; nothing left to commit.
            self.state = ConsumerState::Idle;
            return Ok(());
        }

        if self.commit_with_retry(&unit)? {
            self.state = ConsumerState::Acking;
            for (id, _) in &unit {
                self.queue.ack(*id)?;
                self.counters.entries_acked.fetch_add(1, Ordering::Relaxed);
            }
            self.counters.units_committed.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %self.queue.name(), entries = unit.len(), "unit committed and acked");
        } else {
            self.state = ConsumerState::Failed;
            let ids: Vec<EntryId> = unit.iter().map(|(id, _)| *id).collect();
            self.queue.requeue_all(&ids)?;
            self.counters
                .entries_requeued
                .fetch_add(ids.len() as u64, Ordering::Relaxed);
            warn!(
                queue = %self.queue.name(),
                entries = ids.len(),
                "unit failed, requeued to tail for redelivery"
            );
        }

        self.state = ConsumerState::Idle;
        Ok(())
    }

    /// Collect one unit: up to `batch_size` entries. A partial window is
    /// shipped only once `commit()` has been signalled and Main is
    /// (temporarily) exhausted; before completion the consumer keeps
    /// blocking until the window fills.
    fn pull_window(&mut self) -> Result<Vec<QueueEntry>> {
        let mut window = Vec::with_capacity(self.config.batch_size);
        loop {
            match self.queue.dequeue_blocking(self.config.poll_interval)? {
                Some(entry) => {
                    window.push(entry);
                    if window.len() == self.config.batch_size {
                        return Ok(window);
                    }
                }
                None if self.session.is_completed() => return Ok(window),
                None if window.is_empty() => return Ok(window),
                None => {} // partial window, session still open: keep waiting
            }
        }
    }

    /// Decode and prepare each pulled entry. Undecodable entries are
    /// quarantined and dropped from the unit; decoding never partially
    /// constructs an operation, so the rest of the unit is unaffected.
    fn decode_and_prepare(
        &mut self,
        window: Vec<QueueEntry>,
    ) -> Result<Vec<(EntryId, CommitOperation)>> {
        let mut unit = Vec::with_capacity(window.len());
        for entry in window {
            match codec::decode(&entry.payload) {
                Ok(CommitOperation::Add(add)) => {
                    let prepared = self.prepare.prepare_addition(add);
                    unit.push((entry.id, CommitOperation::Add(prepared)));
                }
                Ok(CommitOperation::Delete(del)) => {
                    let prepared = self.prepare.prepare_deletion(del);
                    unit.push((entry.id, CommitOperation::Delete(prepared)));
                }
                Err(err) => {
                    error!(
                        queue = %self.queue.name(),
                        id = %entry.id,
                        error = %err,
                        "undecodable entry, quarantining"
                    );
                    self.queue.quarantine(entry.id)?;
                    self.counters
                        .entries_quarantined
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(unit)
    }

    /// Invoke the commit hook, retrying per policy. Returns whether the
    /// unit was durably applied downstream. A committer `Err` is treated
    /// as a failed attempt for item disposition, and surfaced to the
    /// operator log as an unexpected error.
    fn commit_with_retry(&mut self, unit: &[(EntryId, CommitOperation)]) -> Result<bool> {
        let ops: Vec<CommitOperation> = unit.iter().map(|(_, op)| op.clone()).collect();
        let mut attempt: u32 = 0;
        loop {
            let outcome = if self.config.batch_size == 1 {
                self.committer.commit(&ops[0])
            } else {
                self.committer.commit_batch(&ops)
            };

            match outcome {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    debug!(
                        queue = %self.queue.name(),
                        attempt,
                        "committer reported transient failure"
                    );
                }
                Err(err) => {
                    error!(
                        queue = %self.queue.name(),
                        attempt,
                        error = %err,
                        "committer raised unexpectedly; treating as failed attempt"
                    );
                }
            }

            if attempt >= self.retry.max_retries() {
                return Ok(false);
            }
            let wait = self.retry.backoff(attempt);
            debug!(
                queue = %self.queue.name(),
                attempt,
                wait_ms = wait.as_millis() as u64,
                "retrying commit"
            );
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            thread::sleep(wait);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommitChannel;
    use parking_lot::Mutex;
    use spool_core::{Error, Metadata};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Scripted committer: pops one outcome per attempt, records window
    /// sizes, and defaults to success once the script runs dry.
    struct ScriptedCommitter {
        script: VecDeque<Result<bool>>,
        windows: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl ScriptedCommitter {
        fn new(script: Vec<Result<bool>>) -> (Self, Arc<Mutex<Vec<Vec<String>>>>) {
            let windows = Arc::new(Mutex::new(Vec::new()));
            (
                ScriptedCommitter {
                    script: script.into_iter().collect(),
                    windows: windows.clone(),
                },
                windows,
            )
        }

        fn outcome(&mut self, refs: Vec<String>) -> Result<bool> {
            let outcome = self.script.pop_front().unwrap_or(Ok(true));
            if matches!(outcome, Ok(true)) {
                self.windows.lock().push(refs);
            }
            outcome
        }
    }

    impl Committer for ScriptedCommitter {
        fn commit(&mut self, op: &CommitOperation) -> Result<bool> {
            self.outcome(vec![op.reference().to_string()])
        }

        fn commit_batch(&mut self, ops: &[CommitOperation]) -> Result<bool> {
            self.outcome(ops.iter().map(|op| op.reference().to_string()).collect())
        }
    }

    struct Fixture {
        queue: Arc<DurableQueue>,
        session: Arc<Session>,
        channel: CommitChannel,
    }

    fn fixture(dir: &std::path::Path) -> Fixture {
        let queue = Arc::new(DurableQueue::open(dir, "consumer-test").unwrap());
        let session = Arc::new(Session::default());
        let channel = CommitChannel::new(queue.clone(), session.clone());
        Fixture {
            queue,
            session,
            channel,
        }
    }

    fn consumer(
        fx: &Fixture,
        batch_size: usize,
        max_retries: u32,
        script: Vec<Result<bool>>,
    ) -> (PullConsumer, Arc<Mutex<Vec<Vec<String>>>>) {
        let (committer, windows) = ScriptedCommitter::new(script);
        let config = ConsumerConfig::default()
            .with_batch_size(batch_size)
            .with_max_retries(max_retries)
            .with_initial_backoff(Duration::from_millis(1))
            .with_poll_interval(Duration::from_millis(10));
        let retry = RetryPolicy::from_config(&config);
        (
            PullConsumer::new(
                fx.queue.clone(),
                fx.session.clone(),
                config,
                Box::new(spool_core::IdentityPrepare),
                Box::new(committer),
                retry,
            ),
            windows,
        )
    }

    fn produce(fx: &Fixture, count: usize) {
        for i in 1..=count {
            fx.channel
                .add(format!("{i}"), b"content".to_vec(), Metadata::new())
                .unwrap();
        }
    }

    #[test]
    fn batch_windows_are_sized_2_2_2_1() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 7);
        fx.channel.commit();

        let (mut consumer, windows) = consumer(&fx, 2, 0, vec![]);
        consumer.run().unwrap();

        let sizes: Vec<usize> = windows.lock().iter().map(|w| w.len()).collect();
        assert_eq!(sizes, vec![2, 2, 2, 1]);

        let refs: Vec<String> = windows.lock().iter().flatten().cloned().collect();
        assert_eq!(refs, vec!["1", "2", "3", "4", "5", "6", "7"]);

        assert_eq!(fx.queue.size(), 0);
        assert_eq!(fx.queue.ephemeral_size(), 0);
        assert_eq!(consumer.state(), ConsumerState::Completed);
    }

    #[test]
    fn failed_window_is_requeued_not_stranded() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 2);

        let (mut consumer, _) = consumer(&fx, 2, 0, vec![Ok(false)]);
        consumer.step().unwrap();

        // Nothing stranded in Ephemeral; the unit went back to Main.
        assert_eq!(fx.queue.ephemeral_size(), 0);
        assert_eq!(fx.queue.size(), 2);
        let counters = consumer.counters().snapshot();
        assert_eq!(counters.entries_requeued, 2);
        assert_eq!(counters.units_committed, 0);
    }

    #[test]
    fn committer_error_treated_as_failure_and_requeued() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 1);

        let (mut consumer, _) = consumer(
            &fx,
            1,
            0,
            vec![Err(Error::Committer("target exploded".into()))],
        );
        consumer.step().unwrap();

        assert_eq!(fx.queue.ephemeral_size(), 0);
        assert_eq!(fx.queue.size(), 1);
    }

    #[test]
    fn retry_policy_is_applied_before_requeue() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 1);
        fx.channel.commit();

        // Two failures, then success, within max_retries = 2.
        let (mut consumer, windows) = consumer(&fx, 1, 2, vec![Ok(false), Ok(false), Ok(true)]);
        consumer.run().unwrap();

        assert_eq!(windows.lock().len(), 1);
        let counters = consumer.counters().snapshot();
        assert_eq!(counters.retries, 2);
        assert_eq!(counters.entries_acked, 1);
        assert_eq!(fx.queue.size(), 0);
        assert_eq!(fx.queue.ephemeral_size(), 0);
    }

    #[test]
    fn retries_exhausted_requeues_then_later_redelivery_succeeds() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 1);
        fx.channel.commit();

        // First unit: fails once, retries once, fails again -> requeue.
        // Redelivery: succeeds.
        let (mut consumer, windows) = consumer(&fx, 1, 1, vec![Ok(false), Ok(false), Ok(true)]);
        consumer.run().unwrap();

        assert_eq!(windows.lock().len(), 1);
        let counters = consumer.counters().snapshot();
        assert_eq!(counters.entries_requeued, 1);
        assert_eq!(counters.entries_acked, 1);
    }

    #[test]
    fn single_mode_commits_one_at_a_time() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 3);
        fx.channel.commit();

        let (mut consumer, windows) = consumer(&fx, 1, 0, vec![]);
        consumer.run().unwrap();

        let sizes: Vec<usize> = windows.lock().iter().map(|w| w.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn undecodable_entry_is_quarantined_and_rest_commit() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());

        fx.channel
            .add("good-1", b"c".to_vec(), Metadata::new())
            .unwrap();
        // Raw bytes that are a valid entry file but not a valid operation.
        fx.queue.enqueue(b"not an operation").unwrap();
        fx.channel
            .add("good-2", b"c".to_vec(), Metadata::new())
            .unwrap();
        fx.channel.commit();

        let (mut consumer, windows) = consumer(&fx, 3, 0, vec![]);
        consumer.run().unwrap();

        let refs: Vec<String> = windows.lock().iter().flatten().cloned().collect();
        assert_eq!(refs, vec!["good-1", "good-2"]);
        assert_eq!(fx.queue.dead_letter_size(), 1);
        assert_eq!(consumer.counters().snapshot().entries_quarantined, 1);
        assert_eq!(fx.queue.ephemeral_size(), 0);
    }

    #[test]
    fn empty_session_completes_immediately() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        fx.channel.commit();

        let (mut consumer, windows) = consumer(&fx, 5, 0, vec![]);
        consumer.run().unwrap();

        assert_eq!(consumer.state(), ConsumerState::Completed);
        assert!(windows.lock().is_empty());
    }

    #[test]
    fn idle_without_completion_does_not_terminate() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());

        let (mut consumer, _) = consumer(&fx, 2, 0, vec![]);
        consumer.step().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[test]
    fn partial_window_waits_for_completion_signal() {
        let dir = tempdir().unwrap();
        let fx = fixture(dir.path());
        produce(&fx, 1);

        // Window of 2 with only 1 item and no completion: nothing ships
        // until the session is signalled.
        let (mut consumer, windows) = consumer(&fx, 2, 0, vec![]);
        let runner = thread::spawn(move || consumer.run());

        thread::sleep(Duration::from_millis(80));
        assert!(windows.lock().is_empty(), "partial window shipped early");

        // Completion releases the partial window.
        fx.channel.commit();
        runner.join().unwrap().unwrap();
        let sizes: Vec<usize> = windows.lock().iter().map(|w| w.len()).collect();
        assert_eq!(sizes, vec![1]);
    }
}
