//! End-to-end produce/consume flows through the public facade.

use parking_lot::Mutex;
use spool::{
    CommitOperation, Committer, ConsumerConfig, Error, IdentityPrepare, Metadata, Result, Spool,
};
use std::sync::Arc;
use std::time::Duration;

/// Committer that fails the first `failures` attempts for each unit,
/// then succeeds, recording every committed reference.
struct FlakyCommitter {
    failures: u32,
    seen_attempts: u32,
    committed: Arc<Mutex<Vec<String>>>,
}

impl FlakyCommitter {
    fn new(failures: u32) -> (Self, Arc<Mutex<Vec<String>>>) {
        let committed = Arc::new(Mutex::new(Vec::new()));
        (
            FlakyCommitter {
                failures,
                seen_attempts: 0,
                committed: committed.clone(),
            },
            committed,
        )
    }
}

impl Committer for FlakyCommitter {
    fn commit(&mut self, op: &CommitOperation) -> Result<bool> {
        if self.seen_attempts < self.failures {
            self.seen_attempts += 1;
            return Ok(false);
        }
        self.seen_attempts = 0;
        self.committed.lock().push(op.reference().to_string());
        Ok(true)
    }

    fn commit_batch(&mut self, ops: &[CommitOperation]) -> Result<bool> {
        if self.seen_attempts < self.failures {
            self.seen_attempts += 1;
            return Ok(false);
        }
        self.seen_attempts = 0;
        let mut committed = self.committed.lock();
        for op in ops {
            committed.push(op.reference().to_string());
        }
        Ok(true)
    }
}

fn fast_config(batch_size: usize) -> ConsumerConfig {
    ConsumerConfig::default()
        .with_batch_size(batch_size)
        .with_poll_interval(Duration::from_millis(10))
        .with_initial_backoff(Duration::from_millis(1))
}

#[test]
fn ordered_delivery_across_batches() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::open(dir.path(), "ordered").unwrap();

    for i in 0..10 {
        spool
            .add(format!("doc-{i:02}"), b"body".to_vec(), Metadata::new())
            .unwrap();
    }
    spool.commit();

    let (committer, committed) = FlakyCommitter::new(0);
    let handle = spool
        .attach_consumer(fast_config(3), Box::new(IdentityPrepare), Box::new(committer))
        .unwrap();
    handle.join().unwrap();

    let refs = committed.lock().clone();
    let expected: Vec<String> = (0..10).map(|i| format!("doc-{i:02}")).collect();
    assert_eq!(refs, expected);
    assert_eq!(spool.stats().pending, 0);
    assert_eq!(spool.stats().in_flight, 0);
}

#[test]
fn at_least_once_with_flaky_target() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::open(dir.path(), "flaky").unwrap();

    for i in 0..6 {
        spool
            .add(format!("doc-{i}"), b"body".to_vec(), Metadata::new())
            .unwrap();
    }
    spool.commit();

    // Each unit fails twice before succeeding; retries stay in-process
    // because max_retries covers them.
    let (committer, committed) = FlakyCommitter::new(2);
    let config = fast_config(2).with_max_retries(3);
    let handle = spool
        .attach_consumer(config, Box::new(IdentityPrepare), Box::new(committer))
        .unwrap();
    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let counters = handle.counters();
    handle.join().unwrap();

    assert_eq!(committed.lock().len(), 6);
    assert_eq!(counters.entries_acked, 6);
    assert!(counters.retries >= 6, "two retries per unit of three units");
}

#[test]
fn exhausted_retries_requeue_and_eventually_deliver() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::open(dir.path(), "requeue").unwrap();

    for i in 0..4 {
        spool
            .add(format!("doc-{i}"), b"body".to_vec(), Metadata::new())
            .unwrap();
    }
    spool.commit();

    // No in-process retry: a failed unit is requeued to the tail and
    // picked up again on a later pull.
    let (committer, committed) = FlakyCommitter::new(1);
    let handle = spool
        .attach_consumer(fast_config(2), Box::new(IdentityPrepare), Box::new(committer))
        .unwrap();
    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let counters = handle.counters();
    handle.join().unwrap();

    let mut refs = committed.lock().clone();
    refs.sort();
    assert_eq!(refs, vec!["doc-0", "doc-1", "doc-2", "doc-3"]);
    assert!(counters.entries_requeued > 0);
    assert_eq!(spool.stats().pending, 0);
    assert_eq!(spool.stats().in_flight, 0);
}

#[test]
fn deletions_and_additions_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::open(dir.path(), "mixed").unwrap();

    let mut meta = Metadata::new();
    meta.add("source", "crawler");
    spool.add("doc-a", b"alpha".to_vec(), meta.clone()).unwrap();
    spool.remove("doc-b", meta).unwrap();
    spool.add("doc-c", b"gamma".to_vec(), Metadata::new()).unwrap();
    spool.commit();

    let ops = Arc::new(Mutex::new(Vec::new()));
    struct Recorder(Arc<Mutex<Vec<(String, bool)>>>);
    impl Committer for Recorder {
        fn commit(&mut self, op: &CommitOperation) -> Result<bool> {
            self.0
                .lock()
                .push((op.reference().to_string(), matches!(op, CommitOperation::Add(_))));
            Ok(true)
        }
    }

    let handle = spool
        .attach_consumer(
            fast_config(1),
            Box::new(IdentityPrepare),
            Box::new(Recorder(ops.clone())),
        )
        .unwrap();
    handle.join().unwrap();

    assert_eq!(
        ops.lock().clone(),
        vec![
            ("doc-a".to_string(), true),
            ("doc-b".to_string(), false),
            ("doc-c".to_string(), true),
        ]
    );
}

#[test]
fn second_process_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let first = Spool::open(dir.path(), "exclusive").unwrap();

    let err = Spool::open(dir.path(), "exclusive").err().unwrap();
    assert!(matches!(err, Error::QueueLocked(_)));

    drop(first);
    Spool::open(dir.path(), "exclusive").unwrap();
}

#[test]
fn queues_under_one_root_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let left = Spool::open(dir.path(), "left").unwrap();
    let right = Spool::open(dir.path(), "right").unwrap();

    left.add("l-doc", b"x".to_vec(), Metadata::new()).unwrap();
    assert_eq!(left.stats().pending, 1);
    assert_eq!(right.stats().pending, 0);

    left.commit();
    let (committer, committed) = FlakyCommitter::new(0);
    let handle = left
        .attach_consumer(fast_config(1), Box::new(IdentityPrepare), Box::new(committer))
        .unwrap();
    handle.join().unwrap();

    assert_eq!(committed.lock().clone(), vec!["l-doc"]);
    assert_eq!(right.stats().pending, 0);
}

#[test]
fn prepare_hook_rewrites_operations() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::open(dir.path(), "prepared").unwrap();

    spool.add("raw", b"x".to_vec(), Metadata::new()).unwrap();
    spool.commit();

    struct Prefixer;
    impl spool::PrepareHook for Prefixer {
        fn prepare_addition(&mut self, mut add: spool::AddOperation) -> spool::AddOperation {
            add.metadata.set("stage", "prepared");
            add
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    struct MetaRecorder(Arc<Mutex<Vec<String>>>);
    impl Committer for MetaRecorder {
        fn commit(&mut self, op: &CommitOperation) -> Result<bool> {
            if let Some(stage) = op.metadata().get("stage") {
                self.0.lock().push(stage.to_string());
            }
            Ok(true)
        }
    }

    let handle = spool
        .attach_consumer(
            fast_config(1),
            Box::new(Prefixer),
            Box::new(MetaRecorder(seen.clone())),
        )
        .unwrap();
    handle.join().unwrap();

    assert_eq!(seen.lock().clone(), vec!["prepared"]);
}
