//! Datastore configuration.

use crate::error::{CoreError, CoreResult};
use crate::matcher::{BasicMatcher, DocumentMatcher};
use crate::persistence::{IdentityTransform, LineTransform, DEFAULT_CORRUPT_ALERT_THRESHOLD};
use emberdb_storage::{LogBackend, TEMP_SUFFIX};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Shortest allowed automatic compaction interval.
pub const MIN_AUTO_COMPACTION_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for opening a [`Datastore`](crate::Datastore).
#[derive(Clone)]
pub struct Config {
    /// Data log location. `None` keeps the store in memory.
    pub filename: Option<PathBuf>,

    /// Stamp `createdAt`/`updatedAt` on inserted and updated documents.
    pub timestamp_data: bool,

    /// Fraction of corrupt lines above which loading fails (0..=1).
    pub corrupt_alert_threshold: f64,

    /// Period of automatic compaction (zero disables).
    pub auto_compaction_interval: Duration,

    /// Inverse transform pair applied to every stored line.
    pub transform: Arc<dyn LineTransform>,

    /// Query, update and ordering functions.
    pub matcher: Arc<dyn DocumentMatcher>,

    /// Storage backend used instead of the one derived from `filename`.
    pub backend: Option<Arc<dyn LogBackend>>,

    /// Attempts to take the rewrite lock before giving up.
    pub lock_retries: u32,

    /// Pause between lock attempts.
    pub lock_retry_delay: Duration,

    /// Seed for the random source of index trees.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filename: None,
            timestamp_data: false,
            corrupt_alert_threshold: DEFAULT_CORRUPT_ALERT_THRESHOLD,
            auto_compaction_interval: Duration::ZERO, // disabled
            transform: Arc::new(IdentityTransform),
            matcher: Arc::new(BasicMatcher),
            backend: None,
            lock_retries: 10,
            lock_retry_delay: Duration::from_millis(50),
            rng_seed: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("filename", &self.filename)
            .field("timestamp_data", &self.timestamp_data)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .field("auto_compaction_interval", &self.auto_compaction_interval)
            .field("transform", &self.transform)
            .field("matcher", &self.matcher)
            .field("custom_backend", &self.backend.is_some())
            .field("lock_retries", &self.lock_retries)
            .field("lock_retry_delay", &self.lock_retry_delay)
            .field("rng_seed", &self.rng_seed)
            .finish()
    }
}

impl Config {
    /// Creates a configuration for an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data log location.
    #[must_use]
    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filename = Some(path.into());
        self
    }

    /// Enables or disables automatic timestamps.
    #[must_use]
    pub fn timestamp_data(mut self, value: bool) -> Self {
        self.timestamp_data = value;
        self
    }

    /// Sets the corrupt line threshold.
    #[must_use]
    pub fn corrupt_alert_threshold(mut self, value: f64) -> Self {
        self.corrupt_alert_threshold = value;
        self
    }

    /// Sets the automatic compaction period.
    #[must_use]
    pub fn auto_compaction_interval(mut self, interval: Duration) -> Self {
        self.auto_compaction_interval = interval;
        self
    }

    /// Sets the line transform pair.
    #[must_use]
    pub fn transform(mut self, transform: Arc<dyn LineTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Sets the document matcher.
    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn DocumentMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Uses a custom storage backend.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn LogBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the rewrite lock retry policy.
    #[must_use]
    pub fn lock_policy(mut self, retries: u32, delay: Duration) -> Self {
        self.lock_retries = retries;
        self.lock_retry_delay = delay;
        self
    }

    /// Seeds the random source of index trees.
    #[must_use]
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Returns the compaction interval after clamping, or `None` if disabled.
    #[must_use]
    pub fn effective_compaction_interval(&self) -> Option<Duration> {
        clamp_interval(self.auto_compaction_interval)
    }

    /// Checks the configuration before any file is touched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a filename ending in `~` or
    /// a threshold outside `0..=1`.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(path) = &self.filename {
            if path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                return Err(CoreError::invalid_config(format!(
                    "the datafile name can't end with a {TEMP_SUFFIX}, which is reserved for \
                     crash safe backup files: {}",
                    path.display()
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.corrupt_alert_threshold) {
            return Err(CoreError::invalid_config(format!(
                "corrupt alert threshold must be between 0 and 1, got {}",
                self.corrupt_alert_threshold
            )));
        }
        Ok(())
    }
}

/// Applies the minimum compaction interval. Zero disables compaction.
pub(crate) fn clamp_interval(interval: Duration) -> Option<Duration> {
    if interval.is_zero() {
        None
    } else {
        Some(interval.max(MIN_AUTO_COMPACTION_INTERVAL))
    }
}
