//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// Which of the two companion logs an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// Document snapshots and tombstones.
    Data,
    /// Index creation and removal directives.
    Index,
}

/// A line-oriented storage backend for EmberDB.
///
/// Storage backends are **opaque line stores**. EmberDB owns the meaning of
/// every line; backends only keep them in order.
///
/// # Invariants
///
/// - Lines are returned by [`read_lines`](Self::read_lines) in the order they
///   were written
/// - [`rewrite`](Self::rewrite) replaces a log as a whole: after a crash the log
///   holds either the old or the complete new content
/// - Lines never contain `'\n'`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait LogBackend: Send + Sync {
    /// Prepares the backend for use (creates files, recovers interrupted rewrites).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be prepared.
    fn init(&self) -> StorageResult<()>;

    /// Streams every line of `kind` into `emit`, in order.
    ///
    /// Returning from this method is the end-of-stream signal.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    fn read_lines(&self, kind: LogKind, emit: &mut dyn FnMut(&str)) -> StorageResult<()>;

    /// Replaces the full content of `kind` with `lines`.
    ///
    /// The iterator running dry is the end-of-stream signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement could not be made durable. The
    /// previous content is left in place in that case.
    fn rewrite(&self, kind: LogKind, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()>;

    /// Appends a single line to `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line contains a newline or the write fails.
    fn append_line(&self, kind: LogKind, line: &str) -> StorageResult<()>;

    /// Appends several lines to `kind`, in order.
    ///
    /// # Errors
    ///
    /// Returns the first append error.
    fn append_lines(&self, kind: LogKind, lines: &[String]) -> StorageResult<()> {
        for line in lines {
            self.append_line(kind, line)?;
        }
        Ok(())
    }

    /// Streams the index log.
    fn read_index_log(&self, emit: &mut dyn FnMut(&str)) -> StorageResult<()> {
        self.read_lines(LogKind::Index, emit)
    }

    /// Streams the data log.
    fn read_data_log(&self, emit: &mut dyn FnMut(&str)) -> StorageResult<()> {
        self.read_lines(LogKind::Data, emit)
    }

    /// Replaces the index log.
    fn rewrite_index_log(&self, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()> {
        self.rewrite(LogKind::Index, lines)
    }

    /// Replaces the data log.
    fn rewrite_data_log(&self, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()> {
        self.rewrite(LogKind::Data, lines)
    }

    /// Appends one line to the index log.
    fn append_index_line(&self, line: &str) -> StorageResult<()> {
        self.append_line(LogKind::Index, line)
    }

    /// Appends one line to the data log.
    fn append_data_line(&self, line: &str) -> StorageResult<()> {
        self.append_line(LogKind::Data, line)
    }
}

/// Rejects lines that would break newline framing.
pub(crate) fn check_line(line: &str) -> StorageResult<()> {
    if line.contains('\n') {
        return Err(StorageError::invalid_line("line contains a newline"));
    }
    Ok(())
}
