//! # EmberDB Storage
//!
//! Storage backends for EmberDB's append-only logs.
//!
//! Every collection is persisted as two companion logs of newline-terminated
//! lines: the data log (document snapshots and tombstones) and the index log
//! (index creation/removal directives). Backends are **opaque line stores**:
//! they never interpret the lines they hold.
//!
//! ## Design Principles
//!
//! - Backends stream lines in order, append single lines, and replace a whole
//!   log atomically
//! - A full rewrite never leaves a partially written log behind
//! - Physical file operations of one store go through a single [`IoChannel`]
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - Crash-safe persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use emberdb_storage::{InMemoryBackend, LogBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.append_data_line(r#"{"_id":"a"}"#).unwrap();
//!
//! let mut lines = Vec::new();
//! backend.read_data_log(&mut |line| lines.push(line.to_string())).unwrap();
//! assert_eq!(lines, vec![r#"{"_id":"a"}"#.to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod channel;
mod error;
mod file;
mod lock;
mod memory;

pub use backend::{LogBackend, LogKind};
pub use channel::IoChannel;
pub use error::{StorageError, StorageResult};
pub use file::{temp_path, FileBackend, INDEX_LOG_SUFFIX, LOCK_SUFFIX, TEMP_SUFFIX};
pub use lock::LockFile;
pub use memory::InMemoryBackend;
