//! Advisory lock file guarding log rewrites.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// An exclusive advisory lock on a companion lock file.
///
/// The lock is released when the value is dropped. Holding it prevents a
/// second process (or a second, misconfigured store in this process) from
/// rewriting the same log concurrently.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Acquires the lock at `path`, retrying up to `retries` extra times.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if the lock is still held after the
    /// last attempt, or an I/O error if the lock file cannot be opened.
    pub fn acquire(path: &Path, retries: u32, delay: Duration) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let attempts = retries.saturating_add(1);
        for attempt in 1..=attempts {
            if file.try_lock_exclusive().is_ok() {
                return Ok(Self {
                    path: path.to_path_buf(),
                    file,
                });
            }
            if attempt < attempts {
                warn!(path = %path.display(), attempt, "lock file busy, retrying");
                thread::sleep(delay);
            }
        }

        Err(StorageError::Locked {
            path: path.to_path_buf(),
            attempts,
        })
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
