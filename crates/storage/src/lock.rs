//! Exclusive ownership of a queue storage directory.
//!
//! Only one process may own a queue directory at a time; a second open
//! must fail fast rather than corrupt region state. Ownership is an
//! advisory `fs2` lock on a `LOCK` file inside the directory, released
//! automatically when the holder drops (or dies).

use fs2::FileExt;
use spool_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the lock file inside a queue directory.
pub const LOCK_FILE: &str = "LOCK";

/// Held exclusive lock on a queue directory.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    dir: PathBuf,
}

impl DirLock {
    /// Acquire the lock for `dir`, failing fast if another process
    /// (or another handle in this process) holds it.
    ///
    /// # Errors
    ///
    /// [`Error::QueueLocked`] when the lock is held elsewhere;
    /// [`Error::Io`] if the lock file cannot be created.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(dir = %dir.display(), "acquired queue directory lock");
                Ok(DirLock {
                    file,
                    dir: dir.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(Error::QueueLocked(dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Directory this lock protects.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release() {
        let dir = tempdir().unwrap();

        let lock = DirLock::acquire(dir.path()).unwrap();
        assert_eq!(lock.dir(), dir.path());
        drop(lock);

        // Released on drop, so a fresh acquire succeeds.
        DirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempdir().unwrap();

        let _held = DirLock::acquire(dir.path()).unwrap();
        match DirLock::acquire(dir.path()) {
            Err(Error::QueueLocked(path)) => assert_eq!(path, dir.path()),
            other => panic!("expected QueueLocked, got {other:?}"),
        }
    }
}
