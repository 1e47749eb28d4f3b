//! Crash-recoverable FIFO queue with in-flight tracking.
//!
//! # Directory layout
//!
//! ```text
//! <dir>/<name>/
//! ├── queue.json    manifest: format version + queue name
//! ├── LOCK          exclusive ownership (fs2 advisory lock)
//! ├── main/         entries awaiting delivery, one file per entry
//! ├── ephemeral/    entries dequeued but not yet acknowledged
//! └── dead/         quarantined entries, never redelivered
//! ```
//!
//! Entry files are named by zero-padded id, so filename order is FIFO
//! order. Region moves are single `rename` calls: an entry is in exactly
//! one region at any instant, crash or no crash. The only operation that
//! needs a durability barrier is `enqueue` (write + fsync + rename);
//! everywhere else a crash merely re-delivers, which at-least-once
//! permits.

use crate::format;
use crate::lock::DirLock;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use spool_core::{validate_queue_name, EntryId, Error, QueueEntry, Result};
use std::collections::{BTreeSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Name of the manifest file inside a queue directory.
pub const MANIFEST_FILE: &str = "queue.json";

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

const MAIN_DIR: &str = "main";
const EPHEMERAL_DIR: &str = "ephemeral";
const DEAD_DIR: &str = "dead";
const ENTRY_SUFFIX: &str = ".op";
const TMP_SUFFIX: &str = ".tmp";

/// Persisted queue identity, checked on every open.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    queue_name: String,
}

/// In-memory view of region membership, rebuilt from disk on open.
struct QueueState {
    /// Ids awaiting delivery, in delivery order.
    main: VecDeque<EntryId>,
    /// Ids dequeued but not yet acknowledged.
    ephemeral: BTreeSet<EntryId>,
    /// Next id to assign; ids are never reused while open.
    next_id: u64,
}

/// Single-writer-per-process, crash-safe FIFO storage with in-flight
/// tracking.
///
/// All region state is reconstructed purely from the storage directory
/// on open; no entry depends on in-memory state to survive a crash.
pub struct DurableQueue {
    root: PathBuf,
    name: String,
    state: Mutex<QueueState>,
    available: Condvar,
    dead_count: AtomicUsize,
    _lock: DirLock,
}

impl DurableQueue {
    /// Open (or create) the queue named `name` under `dir`.
    ///
    /// Takes exclusive ownership of the storage directory, verifies the
    /// manifest, clears partially-written temp files, and rebuilds region
    /// membership from the entry files present.
    ///
    /// # Errors
    ///
    /// [`Error::QueueLocked`] if another handle owns the directory,
    /// [`Error::Corruption`] if the manifest does not match, or
    /// [`Error::Io`] / [`Error::Config`] for filesystem and naming
    /// problems.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        validate_queue_name(name)?;

        let root = dir.join(name);
        fs::create_dir_all(root.join(MAIN_DIR))?;
        fs::create_dir_all(root.join(EPHEMERAL_DIR))?;
        fs::create_dir_all(root.join(DEAD_DIR))?;

        let lock = DirLock::acquire(&root)?;
        Self::check_manifest(&root, name)?;

        let main_ids = scan_region(&root.join(MAIN_DIR))?;
        let ephemeral_ids = scan_region(&root.join(EPHEMERAL_DIR))?;
        let dead = scan_region(&root.join(DEAD_DIR))?.len();

        let max_id = main_ids
            .iter()
            .chain(ephemeral_ids.iter())
            .map(|id| id.as_u64())
            .max()
            .unwrap_or(0);

        let state = QueueState {
            main: main_ids.into_iter().collect(),
            ephemeral: ephemeral_ids.into_iter().collect(),
            next_id: max_id + 1,
        };

        info!(
            queue = name,
            pending = state.main.len(),
            in_flight = state.ephemeral.len(),
            dead,
            "opened durable queue"
        );

        Ok(DurableQueue {
            root,
            name: name.to_string(),
            state: Mutex::new(state),
            available: Condvar::new(),
            dead_count: AtomicUsize::new(dead),
            _lock: lock,
        })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage directory owned by this queue.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append a payload to the tail of Main.
    ///
    /// The entry is durable before this returns: the file is written and
    /// fsynced under a temporary name, renamed into `main/`, and the
    /// region directory is fsynced. This is the only place data could be
    /// lost without a barrier, so it is the only place that pays for one.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the write cannot be made durable.
    pub fn enqueue(&self, payload: &[u8]) -> Result<EntryId> {
        let enqueued_at_ms = now_ms();
        let bytes = format::encode_entry(payload, enqueued_at_ms);

        let mut state = self.state.lock();
        let id = EntryId(state.next_id);
        state.next_id += 1;

        let final_path = self.entry_path(MAIN_DIR, id);
        let tmp_path = final_path.with_extension("op.tmp");
        {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        sync_dir(&self.root.join(MAIN_DIR))?;

        state.main.push_back(id);
        debug!(queue = %self.name, %id, bytes = bytes.len(), "enqueued entry");
        self.available.notify_one();
        Ok(id)
    }

    /// Pop the head of Main, moving it to Ephemeral.
    ///
    /// Blocks while Main is empty, up to `timeout`; returns `None` on
    /// timeout. Entries whose files fail their frame check are
    /// quarantined to the dead-letter region and skipped, so a poison
    /// entry never wedges the head.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the store itself is unusable.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<QueueEntry>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = self.pop_valid(&mut state)? {
                return Ok(Some(entry));
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Ok(self.pop_valid(&mut state)?);
            }
        }
    }

    /// Non-blocking variant of [`DurableQueue::dequeue_blocking`].
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the store itself is unusable.
    pub fn try_dequeue(&self) -> Result<Option<QueueEntry>> {
        let mut state = self.state.lock();
        self.pop_valid(&mut state)
    }

    /// Remove `id` from Ephemeral permanently.
    ///
    /// Acking an unknown id is a no-op returning `false` (documented
    /// choice): acks are idempotent and never resurrect an entry.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the entry file cannot be removed.
    pub fn ack(&self, id: EntryId) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.ephemeral.remove(&id) {
            debug!(queue = %self.name, %id, "ack for unknown id ignored");
            return Ok(false);
        }
        let path = self.entry_path(EPHEMERAL_DIR, id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(queue = %self.name, %id, "acked entry file already gone");
            }
            Err(e) => return Err(e.into()),
        }
        debug!(queue = %self.name, %id, "acked entry");
        Ok(true)
    }

    /// Move `id` from Ephemeral back to the tail of Main.
    ///
    /// The entry receives a fresh id: redelivered items lose their
    /// original ordering priority relative to newer items, which keeps a
    /// poison item from blocking the head during recovery.
    ///
    /// # Errors
    ///
    /// [`Error::EntryNotFound`] if `id` is not in Ephemeral, or
    /// [`Error::Io`] on rename failure.
    pub fn requeue(&self, id: EntryId) -> Result<EntryId> {
        let mut state = self.state.lock();
        self.requeue_locked(&mut state, id)
    }

    /// Batch form of [`DurableQueue::requeue`], atomic with respect to
    /// other queue operations.
    ///
    /// # Errors
    ///
    /// Fails on the first id not present in Ephemeral.
    pub fn requeue_all(&self, ids: &[EntryId]) -> Result<Vec<EntryId>> {
        let mut state = self.state.lock();
        let mut new_ids = Vec::with_capacity(ids.len());
        for &id in ids {
            new_ids.push(self.requeue_locked(&mut state, id)?);
        }
        Ok(new_ids)
    }

    /// Return every in-flight entry to the tail of Main.
    ///
    /// Run once at startup, before any dequeue is served: a non-empty
    /// Ephemeral region at process start can only mean the prior process
    /// died mid-processing. This is the sole mechanism restoring
    /// at-least-once delivery across crashes.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] on rename failure.
    pub fn recover_orphans(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let orphans: Vec<EntryId> = state.ephemeral.iter().copied().collect();
        for &id in &orphans {
            self.requeue_locked(&mut state, id)?;
        }
        if !orphans.is_empty() {
            info!(
                queue = %self.name,
                count = orphans.len(),
                "recovered orphaned in-flight entries"
            );
        }
        Ok(orphans.len())
    }

    /// Move `id` from Ephemeral to the dead-letter region.
    ///
    /// Quarantined entries are never redelivered; they stay on disk for
    /// operator inspection.
    ///
    /// # Errors
    ///
    /// [`Error::EntryNotFound`] if `id` is not in Ephemeral.
    pub fn quarantine(&self, id: EntryId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.ephemeral.remove(&id) {
            return Err(Error::EntryNotFound(id));
        }
        self.quarantine_file(id)
    }

    /// Number of entries awaiting delivery.
    pub fn size(&self) -> usize {
        self.state.lock().main.len()
    }

    /// Number of entries dequeued but not yet acknowledged.
    pub fn ephemeral_size(&self) -> usize {
        self.state.lock().ephemeral.len()
    }

    /// Number of quarantined entries.
    pub fn dead_letter_size(&self) -> usize {
        self.dead_count.load(Ordering::Relaxed)
    }

    /// Delete the queue's storage directory, consuming the handle.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the directory cannot be removed.
    pub fn destroy(self) -> Result<()> {
        let root = self.root.clone();
        let name = self.name.clone();
        drop(self);
        fs::remove_dir_all(&root)?;
        info!(queue = %name, "destroyed queue storage");
        Ok(())
    }

    /// Pop entries off Main until one decodes, quarantining any that
    /// fail their frame check. Caller holds the state lock.
    fn pop_valid(&self, state: &mut QueueState) -> Result<Option<QueueEntry>> {
        while let Some(id) = state.main.pop_front() {
            let from = self.entry_path(MAIN_DIR, id);
            let to = self.entry_path(EPHEMERAL_DIR, id);
            fs::rename(&from, &to)?;
            state.ephemeral.insert(id);

            let bytes = fs::read(&to)?;
            match format::decode_entry(&bytes) {
                Ok((enqueued_at_ms, payload)) => {
                    debug!(queue = %self.name, %id, "dequeued entry");
                    return Ok(Some(QueueEntry {
                        id,
                        payload,
                        enqueued_at_ms,
                    }));
                }
                Err(err) => {
                    warn!(
                        queue = %self.name,
                        %id,
                        error = %err,
                        "entry file failed frame check, quarantining"
                    );
                    state.ephemeral.remove(&id);
                    self.quarantine_file(id)?;
                }
            }
        }
        Ok(None)
    }

    /// Move an ephemeral entry file to the tail of Main under a fresh
    /// id. Caller holds the state lock and has verified membership.
    fn requeue_locked(&self, state: &mut QueueState, id: EntryId) -> Result<EntryId> {
        if !state.ephemeral.remove(&id) {
            return Err(Error::EntryNotFound(id));
        }
        let new_id = EntryId(state.next_id);
        state.next_id += 1;

        let from = self.entry_path(EPHEMERAL_DIR, id);
        let to = self.entry_path(MAIN_DIR, new_id);
        fs::rename(&from, &to)?;

        state.main.push_back(new_id);
        debug!(queue = %self.name, old = %id, new = %new_id, "requeued entry to tail");
        self.available.notify_one();
        Ok(new_id)
    }

    fn quarantine_file(&self, id: EntryId) -> Result<()> {
        let from = self.entry_path(EPHEMERAL_DIR, id);
        let to = self.entry_path(DEAD_DIR, id);
        fs::rename(&from, &to)?;
        self.dead_count.fetch_add(1, Ordering::Relaxed);
        warn!(queue = %self.name, %id, "entry moved to dead-letter region");
        Ok(())
    }

    fn entry_path(&self, region: &str, id: EntryId) -> PathBuf {
        self.root
            .join(region)
            .join(format!("{:020}{}", id.as_u64(), ENTRY_SUFFIX))
    }

    fn check_manifest(root: &Path, name: &str) -> Result<()> {
        let path = root.join(MANIFEST_FILE);
        if path.exists() {
            let data = fs::read_to_string(&path)?;
            let manifest: Manifest = serde_json::from_str(&data)
                .map_err(|e| Error::Corruption(format!("unreadable queue manifest: {e}")))?;
            if manifest.format_version != MANIFEST_FORMAT_VERSION {
                return Err(Error::Corruption(format!(
                    "unsupported manifest version {}",
                    manifest.format_version
                )));
            }
            if manifest.queue_name != name {
                return Err(Error::Corruption(format!(
                    "directory belongs to queue {:?}, not {:?}",
                    manifest.queue_name, name
                )));
            }
            return Ok(());
        }

        let manifest = Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            queue_name: name.to_string(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::Corruption(format!("manifest encode failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        sync_dir(root)?;
        Ok(())
    }
}

/// List entry ids in a region directory, ascending. Removes leftover
/// temp files from interrupted writes; warns on anything unrecognized.
fn scan_region(dir: &Path) -> Result<Vec<EntryId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.ends_with(TMP_SUFFIX) {
            // Interrupted write that never became durable.
            fs::remove_file(entry.path())?;
            continue;
        }
        match name
            .strip_suffix(ENTRY_SUFFIX)
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            Some(id) => ids.push(EntryId(id)),
            None => warn!(file = %name, dir = %dir.display(), "ignoring unrecognized file"),
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
