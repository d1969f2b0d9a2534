//! File-based storage backend for persistent storage.
//!
//! On-disk layout for a store whose reference path is `<ref>`:
//!
//! ```text
//! <ref>          # data log (document snapshots, tombstones)
//! <ref>.idx      # index log (index directives)
//! <ref>.lock     # advisory lock held during rewrites
//! <file>~        # in-flight rewrite of <file>, never a final name
//! ```

use crate::backend::{check_line, LogBackend, LogKind};
use crate::channel::IoChannel;
use crate::error::{StorageError, StorageResult};
use crate::lock::LockFile;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Suffix reserved for in-flight rewrites.
pub const TEMP_SUFFIX: &str = "~";
/// Suffix of the index log next to the data log.
pub const INDEX_LOG_SUFFIX: &str = ".idx";
/// Suffix of the rewrite lock file.
pub const LOCK_SUFFIX: &str = ".lock";

const DEFAULT_LOCK_RETRIES: u32 = 10;
const DEFAULT_LOCK_DELAY: Duration = Duration::from_millis(50);

/// Returns the temporary name used while rewriting `path`.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, TEMP_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// A crash-safe, file-based log backend.
///
/// # Durability
///
/// - Appends are followed by `sync_data`
/// - Rewrites go to `<file>~`, are synced, renamed over `<file>`, and the
///   containing directory is synced, so a crash leaves either the old or the
///   complete new file
/// - Rewrites hold an exclusive lock on `<ref>.lock`
///
/// # Thread Safety
///
/// All physical operations are funnelled through the store's [`IoChannel`].
///
/// # Example
///
/// ```no_run
/// use emberdb_storage::{FileBackend, LogBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("people.db")).unwrap();
/// backend.init().unwrap();
/// backend.append_data_line(r#"{"_id":"1","name":"Ada"}"#).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    data_path: PathBuf,
    index_path: PathBuf,
    lock_path: PathBuf,
    io: Arc<IoChannel>,
    lock_retries: u32,
    lock_delay: Duration,
}

impl FileBackend {
    /// Creates a backend for the data log at `path` with its own I/O channel.
    ///
    /// No file is touched until [`LogBackend::init`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPath`] if `path` ends with the reserved
    /// temporary suffix `~` or has no file name.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::with_channel(path, Arc::new(IoChannel::new()))
    }

    /// Creates a backend that shares the given I/O channel.
    ///
    /// # Errors
    ///
    /// Same as [`FileBackend::open`].
    pub fn with_channel(path: &Path, io: Arc<IoChannel>) -> StorageResult<Self> {
        validate_path(path)?;
        Ok(Self {
            data_path: path.to_path_buf(),
            index_path: with_suffix(path, INDEX_LOG_SUFFIX),
            lock_path: with_suffix(path, LOCK_SUFFIX),
            io,
            lock_retries: DEFAULT_LOCK_RETRIES,
            lock_delay: DEFAULT_LOCK_DELAY,
        })
    }

    /// Sets how often lock acquisition is retried and the pause in between.
    #[must_use]
    pub fn lock_policy(mut self, retries: u32, delay: Duration) -> Self {
        self.lock_retries = retries;
        self.lock_delay = delay;
        self
    }

    /// Returns the path of the data log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.data_path
    }

    /// Returns the path of the given log.
    #[must_use]
    pub fn log_path(&self, kind: LogKind) -> &Path {
        match kind {
            LogKind::Data => &self.data_path,
            LogKind::Index => &self.index_path,
        }
    }

    /// Returns the path of the rewrite lock file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Returns the I/O channel this backend runs on.
    #[must_use]
    pub fn channel(&self) -> &Arc<IoChannel> {
        &self.io
    }

    fn parent_dir(&self) -> PathBuf {
        match self.data_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Makes sure `path` exists, promoting a complete leftover rewrite if the
    /// final file is missing.
    fn ensure_integrity(&self, path: &Path) -> StorageResult<()> {
        if path.exists() {
            return Ok(());
        }

        let temp = temp_path(path);
        if temp.exists() {
            info!(path = %path.display(), "promoting leftover rewrite");
            fs::rename(&temp, path)?;
        } else {
            File::create(path)?.sync_all()?;
        }
        sync_directory(&self.parent_dir())
    }
}

fn validate_path(path: &Path) -> StorageResult<()> {
    let Some(name) = path.file_name() else {
        return Err(StorageError::invalid_path(path, "path has no file name"));
    };
    if name.to_string_lossy().ends_with(TEMP_SUFFIX) {
        return Err(StorageError::invalid_path(
            path,
            "file names ending with '~' are reserved for in-flight rewrites",
        ));
    }
    Ok(())
}

/// Writes `lines` to a fresh file at `path` and syncs it to stable storage.
fn write_synced(path: &Path, lines: &mut dyn Iterator<Item = String>) -> StorageResult<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut count = 0usize;
    for line in lines {
        check_line(&line)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(count)
}

/// Syncs a directory so that renames and creations inside it are durable.
///
/// Windows NTFS journals metadata updates, so the explicit fsync is skipped
/// there.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

impl LogBackend for FileBackend {
    fn init(&self) -> StorageResult<()> {
        self.io.run(|| {
            let parent = self.parent_dir();
            fs::create_dir_all(&parent)?;
            sync_directory(&parent)?;
            self.ensure_integrity(&self.data_path)?;
            self.ensure_integrity(&self.index_path)
        })
    }

    fn read_lines(&self, kind: LogKind, emit: &mut dyn FnMut(&str)) -> StorageResult<()> {
        let path = self.log_path(kind);
        self.io.run(|| {
            let file = match File::open(path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let mut reader = BufReader::new(file);
            let mut buf = Vec::new();
            let mut count = 0usize;
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf)? == 0 {
                    break;
                }
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                emit(&String::from_utf8_lossy(&buf));
                count += 1;
            }
            debug!(path = %path.display(), lines = count, "read log");
            Ok(())
        })
    }

    fn rewrite(&self, kind: LogKind, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()> {
        let path = self.log_path(kind);
        let temp = temp_path(path);
        self.io.run(|| {
            let _lock = LockFile::acquire(&self.lock_path, self.lock_retries, self.lock_delay)?;

            let count = match write_synced(&temp, lines) {
                Ok(count) => count,
                Err(e) => {
                    let _ = fs::remove_file(&temp);
                    return Err(e);
                }
            };

            fs::rename(&temp, path)?;
            sync_directory(&self.parent_dir())?;
            debug!(path = %path.display(), lines = count, "rewrote log");
            Ok(())
        })
    }

    fn append_line(&self, kind: LogKind, line: &str) -> StorageResult<()> {
        self.append_lines(kind, &[line.to_string()])
    }

    fn append_lines(&self, kind: LogKind, lines: &[String]) -> StorageResult<()> {
        for line in lines {
            check_line(line)?;
        }
        if lines.is_empty() {
            return Ok(());
        }

        let path = self.log_path(kind);
        self.io.run(|| {
            let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
            for line in lines {
                buf.push_str(line);
                buf.push('\n');
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(buf.as_bytes())?;
            file.sync_data()?;
            Ok(())
        })
    }
}
