//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configured log path cannot be used.
    #[error("invalid log path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// The rewrite lock could not be acquired.
    #[error("lock file {path:?} is held by another writer (gave up after {attempts} attempts)")]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
        /// Number of acquisition attempts made.
        attempts: u32,
    },

    /// A line handed to the backend would break the line framing.
    #[error("invalid log line: {reason}")]
    InvalidLine {
        /// Description of the problem.
        reason: String,
    },
}

impl StorageError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid line error.
    pub fn invalid_line(reason: impl Into<String>) -> Self {
        Self::InvalidLine {
            reason: reason.into(),
        }
    }
}
