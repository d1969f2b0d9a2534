//! Crash recovery testing utilities.
//!
//! Simulates interrupted writes against the data and index logs and checks
//! that a reopened datastore recovers a consistent state.

use crate::fixtures::doc;
use emberdb_core::{Config, CoreError, CoreResult, Datastore, IndexOptions};
use emberdb_storage::{temp_path, FileBackend, LogBackend, LogKind, StorageError, StorageResult};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Where a simulated crash interrupts the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The last appended line was cut short.
    TornAppend,
    /// A rewrite left a partial temp file next to an intact log.
    LeftoverTempFile,
    /// A rewrite removed the log but never renamed the temp file into place.
    LostLogWithCompleteTemp,
    /// An append failed, so the operation must be rolled back.
    FailedAppend,
    /// A compaction failed, so the old log must stay usable.
    FailedCompaction,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 5] = [
        CrashPoint::TornAppend,
        CrashPoint::LeftoverTempFile,
        CrashPoint::LostLogWithCompleteTemp,
        CrashPoint::FailedAppend,
        CrashPoint::FailedCompaction,
    ];
}

/// Result of a crash recovery test.
#[derive(Debug)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Crash point exercised.
    pub point: CrashPoint,
    /// Number of documents expected after recovery.
    pub expected_documents: usize,
    /// Number of documents found after recovery.
    pub actual_documents: usize,
    /// Error message if failed.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn new(point: CrashPoint, expected: usize, actual: usize) -> Self {
        let passed = expected == actual;
        Self {
            passed,
            point,
            expected_documents: expected,
            actual_documents: actual,
            error: (!passed).then(|| format!("expected {expected} documents, found {actual}")),
        }
    }

    fn failed(point: CrashPoint, expected: usize, error: impl ToString) -> Self {
        Self {
            passed: false,
            point,
            expected_documents: expected,
            actual_documents: 0,
            error: Some(error.to_string()),
        }
    }
}

fn simulated_crash() -> StorageError {
    StorageError::Io(io::Error::other("simulated crash"))
}

/// A backend wrapper that fails writes on demand.
///
/// Appends fail once the number of written lines would exceed the crash
/// limit; rewrites fail while `fail_rewrites` is set. A failing call writes
/// nothing to the inner backend.
pub struct CrashableBackend {
    inner: Arc<dyn LogBackend>,
    crash_after_lines: AtomicUsize,
    lines_written: AtomicUsize,
    fail_rewrites: AtomicBool,
}

impl CrashableBackend {
    /// Wraps a backend. Nothing fails until configured to.
    pub fn new(inner: Arc<dyn LogBackend>) -> Self {
        Self {
            inner,
            crash_after_lines: AtomicUsize::new(usize::MAX),
            lines_written: AtomicUsize::new(0),
            fail_rewrites: AtomicBool::new(false),
        }
    }

    /// Fails appends once `lines` more lines have been written.
    pub fn crash_after(&self, lines: usize) {
        let written = self.lines_written.load(Ordering::SeqCst);
        self.crash_after_lines
            .store(written.saturating_add(lines), Ordering::SeqCst);
    }

    /// Makes every rewrite fail, or succeed again.
    pub fn set_fail_rewrites(&self, fail: bool) {
        self.fail_rewrites.store(fail, Ordering::SeqCst);
    }

    /// Clears every configured failure.
    pub fn reset(&self) {
        self.crash_after_lines.store(usize::MAX, Ordering::SeqCst);
        self.fail_rewrites.store(false, Ordering::SeqCst);
    }

    /// Returns the number of lines appended through this wrapper.
    pub fn lines_written(&self) -> usize {
        self.lines_written.load(Ordering::SeqCst)
    }

    fn reserve(&self, count: usize) -> StorageResult<()> {
        let limit = self.crash_after_lines.load(Ordering::SeqCst);
        let written = self.lines_written.load(Ordering::SeqCst);
        if written.saturating_add(count) > limit {
            return Err(simulated_crash());
        }
        self.lines_written.fetch_add(count, Ordering::SeqCst);
        Ok(())
    }
}

impl LogBackend for CrashableBackend {
    fn init(&self) -> StorageResult<()> {
        self.inner.init()
    }

    fn read_lines(&self, kind: LogKind, emit: &mut dyn FnMut(&str)) -> StorageResult<()> {
        self.inner.read_lines(kind, emit)
    }

    fn rewrite(&self, kind: LogKind, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()> {
        if self.fail_rewrites.load(Ordering::SeqCst) {
            return Err(simulated_crash());
        }
        self.inner.rewrite(kind, lines)
    }

    fn append_line(&self, kind: LogKind, line: &str) -> StorageResult<()> {
        self.reserve(1)?;
        self.inner.append_line(kind, line)
    }

    fn append_lines(&self, kind: LogKind, lines: &[String]) -> StorageResult<()> {
        self.reserve(lines.len())?;
        self.inner.append_lines(kind, lines)
    }
}

/// Runs crash scenarios against file-backed datastores.
#[derive(Debug, Default)]
pub struct CrashHarness {
    documents: usize,
}

impl CrashHarness {
    /// Creates a harness seeding each scenario with 20 documents.
    pub fn new() -> Self {
        Self { documents: 20 }
    }

    /// Sets how many documents each scenario starts with.
    pub fn with_documents(mut self, documents: usize) -> Self {
        self.documents = documents;
        self
    }

    /// Runs every crash point.
    pub fn run_all(&self) -> Vec<CrashRecoveryResult> {
        CrashPoint::ALL.iter().map(|point| self.run(*point)).collect()
    }

    /// Runs one crash point in a fresh temporary directory.
    pub fn run(&self, point: CrashPoint) -> CrashRecoveryResult {
        let expected = self.documents;
        let outcome = TempDir::new().map_err(CoreError::from).and_then(|dir| {
            let path = dir.path().join("crash.db");
            self.seed(&path)?;
            match point {
                CrashPoint::TornAppend => torn_append(&path),
                CrashPoint::LeftoverTempFile => leftover_temp_file(&path),
                CrashPoint::LostLogWithCompleteTemp => lost_log(&path),
                CrashPoint::FailedAppend => failed_append(&path),
                CrashPoint::FailedCompaction => failed_compaction(&path),
            }
        });
        match outcome {
            Ok(actual) => CrashRecoveryResult::new(point, expected, actual),
            Err(err) => CrashRecoveryResult::failed(point, expected, err),
        }
    }

    fn seed(&self, path: &Path) -> CoreResult<()> {
        let store = Datastore::open(Config::new().filename(path))?;
        store.ensure_index(IndexOptions::new("n").unique())?;
        for i in 0..self.documents {
            store.insert(doc(serde_json::json!({"_id": format!("d{i}"), "n": i})))?;
        }
        Ok(())
    }
}

fn reopen_count(path: &Path) -> CoreResult<usize> {
    let store = Datastore::open(Config::new().filename(path))?;
    store.check_indexes()?;
    store.len()
}

fn torn_append(path: &Path) -> CoreResult<usize> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(br#"{"_id":"torn","n":"#)?;
    file.sync_all()?;
    drop(file);
    reopen_count(path)
}

fn leftover_temp_file(path: &Path) -> CoreResult<usize> {
    fs::write(temp_path(path), b"{\"_id\":\"half")?;
    let count = reopen_count(path)?;
    if temp_path(path).exists() {
        return Err(StorageError::invalid_line("temp file survived a reload").into());
    }
    Ok(count)
}

fn lost_log(path: &Path) -> CoreResult<usize> {
    fs::rename(path, temp_path(path))?;
    reopen_count(path)
}

fn failed_append(path: &Path) -> CoreResult<usize> {
    let backend = Arc::new(CrashableBackend::new(Arc::new(FileBackend::open(path)?)));
    let store = Datastore::open(Config::new().backend(backend.clone()))?;
    let before = store.len()?;
    backend.crash_after(0);
    if store.insert(doc(serde_json::json!({"_id": "lost", "n": -1}))).is_ok() {
        return Err(StorageError::invalid_line("insert succeeded past the crash point").into());
    }
    if store.len()? != before {
        return Err(StorageError::invalid_line("failed insert stayed in memory").into());
    }
    drop(store);
    reopen_count(path)
}

fn failed_compaction(path: &Path) -> CoreResult<usize> {
    let backend = Arc::new(CrashableBackend::new(Arc::new(FileBackend::open(path)?)));
    let store = Datastore::open(Config::new().backend(backend.clone()))?;
    backend.set_fail_rewrites(true);
    if store.compact_datafile().is_ok() {
        return Err(StorageError::invalid_line("compaction succeeded past the crash point").into());
    }
    drop(store);
    reopen_count(path)
}
