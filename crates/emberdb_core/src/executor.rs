//! Serialized operation queue.
//!
//! Every datastore operation runs through one [`Executor`]. Tasks run one
//! at a time and complete in submission order. While the queue is paused,
//! submitted tasks wait; forced tasks (used by loading) still run.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct QueueState {
    next_ticket: u64,
    serving: u64,
    running: bool,
    paused: bool,
    forced_waiting: usize,
}

/// FIFO, concurrency-one task queue.
#[derive(Debug, Default)]
pub struct Executor {
    state: Mutex<QueueState>,
    turn: Condvar,
    completed: AtomicU64,
}

/// Releases the queue when a task finishes, even by panicking.
struct Release<'a> {
    executor: &'a Executor,
    forced: bool,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut state = self.executor.state.lock();
        state.running = false;
        if !self.forced {
            state.serving += 1;
        }
        drop(state);
        self.executor.completed.fetch_add(1, Ordering::Relaxed);
        self.executor.turn.notify_all();
    }
}

impl Executor {
    /// Creates a running (unpaused) queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a paused queue.
    #[must_use]
    pub fn paused() -> Self {
        let executor = Self::default();
        executor.state.lock().paused = true;
        executor
    }

    /// Queues `task` and blocks until it has run, returning its result.
    ///
    /// A task must not submit another task to the same queue.
    pub fn run<T>(&self, task: impl FnOnce() -> T) -> T {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        while state.serving != ticket || state.running || state.paused || state.forced_waiting > 0 {
            self.turn.wait(&mut state);
        }
        state.running = true;
        drop(state);

        let _release = Release {
            executor: self,
            forced: false,
        };
        task()
    }

    /// Runs `task` as soon as no task is running, ahead of queued tasks and
    /// regardless of pause.
    pub fn run_forced<T>(&self, task: impl FnOnce() -> T) -> T {
        let mut state = self.state.lock();
        state.forced_waiting += 1;
        while state.running {
            self.turn.wait(&mut state);
        }
        state.forced_waiting -= 1;
        state.running = true;
        drop(state);

        let _release = Release {
            executor: self,
            forced: true,
        };
        task()
    }

    /// Holds queued tasks until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    /// Lets queued tasks run again.
    pub fn resume(&self) {
        self.state.lock().paused = false;
        self.turn.notify_all();
    }

    /// Returns whether the queue is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Number of tasks that have finished.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
