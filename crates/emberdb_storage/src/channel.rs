//! Per-store serialization of physical file operations.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single-concurrency channel for file operations.
///
/// Every lock, read, write, rename and fsync a [`crate::FileBackend`] performs
/// runs inside [`IoChannel::run`], so two operations of the same store never
/// interleave partial writes and at most one set of file descriptors is open
/// at a time. Each store gets its own channel; stores sharing a process do
/// not contend with each other unless they are handed the same channel.
#[derive(Debug, Default)]
pub struct IoChannel {
    gate: Mutex<()>,
    completed: AtomicU64,
}

impl IoChannel {
    /// Creates a new, idle channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `op` with exclusive access to the channel.
    pub fn run<T>(&self, op: impl FnOnce() -> T) -> T {
        let _guard = self.gate.lock();
        let result = op();
        self.completed.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Returns how many operations have gone through this channel.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
