//! Append-only log persistence.
//!
//! Steady-state writes append one line per changed document or index
//! directive. Compaction rewrites both logs from the in-memory state through
//! the backend's crash-safe rewrite. Loading replays both logs, tolerating a
//! bounded fraction of undecodable lines.

mod entry;
mod transform;

pub use entry::{LogEntry, ID_FIELD};
pub use transform::{verify_transform, FnTransform, IdentityTransform, LineTransform};

use crate::error::{CoreError, CoreResult};
use crate::index::IndexOptions;
use emberdb_codec::{to_line, Document};
use emberdb_storage::{LogBackend, LogKind};
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default fraction of corrupt lines tolerated on load.
pub const DEFAULT_CORRUPT_ALERT_THRESHOLD: f64 = 0.1;

/// What a load recovered from the logs.
#[derive(Debug, Default)]
pub struct LoadedState {
    /// Live documents, in order of first appearance.
    pub documents: Vec<Document>,
    /// Live secondary index definitions, in order of first appearance.
    pub indexes: Vec<IndexOptions>,
    /// Non-blank lines read from both logs.
    pub total_lines: usize,
    /// Lines that failed to decode and were skipped.
    pub corrupt_lines: usize,
}

/// Log persistence for one store.
pub struct Persistence {
    backend: Arc<dyn LogBackend>,
    transform: Arc<dyn LineTransform>,
    corrupt_alert_threshold: f64,
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence")
            .field("transform", &self.transform)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .finish_non_exhaustive()
    }
}

impl Persistence {
    /// Creates the persistence layer after checking that the transform pair
    /// round-trips. No file is touched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SerializationAsymmetry`] if the transforms are
    /// not inverses, or [`CoreError::InvalidConfig`] for a threshold outside
    /// `0..=1`.
    pub fn new(
        backend: Arc<dyn LogBackend>,
        transform: Arc<dyn LineTransform>,
        corrupt_alert_threshold: f64,
        rng: &mut dyn RngCore,
    ) -> CoreResult<Self> {
        if !(0.0..=1.0).contains(&corrupt_alert_threshold) {
            return Err(CoreError::invalid_config(format!(
                "corrupt alert threshold must be between 0 and 1, got {corrupt_alert_threshold}"
            )));
        }
        verify_transform(transform.as_ref(), rng)?;
        Ok(Self {
            backend,
            transform,
            corrupt_alert_threshold,
        })
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn LogBackend> {
        &self.backend
    }

    /// Prepares the backend.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be prepared.
    pub fn init(&self) -> CoreResult<()> {
        self.backend.init()?;
        Ok(())
    }

    fn encode(&self, entry: &LogEntry) -> CoreResult<String> {
        self.transform.after_serialization(&entry.to_line()?)
    }

    fn decode(&self, line: &str) -> CoreResult<LogEntry> {
        LogEntry::parse(&self.transform.before_deserialization(line)?)
    }

    /// Appends one line per entry to the log each entry belongs to.
    ///
    /// Every line is encoded before anything is written.
    ///
    /// # Errors
    ///
    /// Returns an encoding or storage error.
    pub fn persist_new_state(&self, entries: &[LogEntry]) -> CoreResult<()> {
        let mut data = Vec::new();
        let mut index = Vec::new();
        for entry in entries {
            let line = self.encode(entry)?;
            match entry.kind() {
                LogKind::Data => data.push(line),
                LogKind::Index => index.push(line),
            }
        }

        if !index.is_empty() {
            self.backend.append_lines(LogKind::Index, &index)?;
        }
        if !data.is_empty() {
            self.backend.append_lines(LogKind::Data, &data)?;
        }
        debug!(data = data.len(), index = index.len(), "appended log lines");
        Ok(())
    }

    /// Rewrites both logs to hold exactly `documents` and `indexes`.
    ///
    /// # Errors
    ///
    /// Returns an encoding or storage error. The backend leaves the previous
    /// log in place when a rewrite fails.
    pub fn compact<'a>(
        &self,
        documents: impl IntoIterator<Item = &'a Document>,
        indexes: &[IndexOptions],
    ) -> CoreResult<()> {
        let data = documents
            .into_iter()
            .map(|doc| self.encode(&LogEntry::Document(doc.clone())))
            .collect::<CoreResult<Vec<_>>>()?;
        let index = indexes
            .iter()
            .filter(|options| options.field_name != ID_FIELD)
            .map(|options| self.encode(&LogEntry::IndexCreated(options.clone())))
            .collect::<CoreResult<Vec<_>>>()?;

        let documents = data.len();
        self.backend
            .rewrite(LogKind::Data, &mut data.into_iter())?;
        self.backend
            .rewrite(LogKind::Index, &mut index.into_iter())?;
        info!(documents, indexes = indexes.len(), "compacted logs");
        Ok(())
    }

    /// Replays both logs.
    ///
    /// Later entries for an `_id` replace earlier ones and a tombstone drops
    /// the document. Blank lines are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptionThresholdExceeded`] if the fraction of
    /// undecodable lines is above the threshold, or a storage error.
    pub fn load(&self) -> CoreResult<LoadedState> {
        let mut replay = Replay::default();

        for kind in [LogKind::Index, LogKind::Data] {
            self.backend.read_lines(kind, &mut |line| {
                if line.trim().is_empty() {
                    return;
                }
                replay.total += 1;
                match self.decode(line) {
                    Ok(entry) => replay.apply(entry),
                    Err(e) => {
                        replay.corrupt += 1;
                        warn!(log = ?kind, error = %e, "skipping corrupt log line");
                    }
                }
            })?;
        }

        #[allow(clippy::cast_precision_loss)]
        let corrupt_ratio = if replay.total == 0 {
            0.0
        } else {
            replay.corrupt as f64 / replay.total as f64
        };
        if corrupt_ratio > self.corrupt_alert_threshold {
            return Err(CoreError::CorruptionThresholdExceeded {
                corrupt: replay.corrupt,
                total: replay.total,
                threshold: self.corrupt_alert_threshold,
            });
        }

        let state = replay.finish();
        info!(
            documents = state.documents.len(),
            indexes = state.indexes.len(),
            lines = state.total_lines,
            corrupt = state.corrupt_lines,
            "loaded logs"
        );
        Ok(state)
    }
}

/// Accumulates live state while replaying.
#[derive(Default)]
struct Replay {
    order: Vec<String>,
    documents: HashMap<String, Document>,
    index_order: Vec<String>,
    indexes: HashMap<String, IndexOptions>,
    total: usize,
    corrupt: usize,
}

impl Replay {
    fn id_key(id: &emberdb_codec::Value) -> String {
        // Encoded form keeps 1 and "1" apart
        to_line(id).unwrap_or_else(|_| format!("{id:?}"))
    }

    fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::Document(doc) => {
                let Some(id) = doc.get(ID_FIELD) else { return };
                let key = Self::id_key(id);
                if self.documents.insert(key.clone(), doc).is_none() {
                    self.order.push(key);
                }
            }
            LogEntry::Tombstone(id) => {
                self.documents.remove(&Self::id_key(&id));
            }
            LogEntry::IndexCreated(options) => {
                let field = options.field_name.clone();
                if self.indexes.insert(field.clone(), options).is_none() {
                    self.index_order.push(field);
                }
            }
            LogEntry::IndexRemoved(field) => {
                self.indexes.remove(&field);
            }
        }
    }

    fn finish(mut self) -> LoadedState {
        let mut documents = Vec::with_capacity(self.documents.len());
        for key in &self.order {
            if let Some(doc) = self.documents.remove(key) {
                documents.push(doc);
            }
        }
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for field in &self.index_order {
            if let Some(options) = self.indexes.remove(field) {
                indexes.push(options);
            }
        }
        LoadedState {
            documents,
            indexes,
            total_lines: self.total,
            corrupt_lines: self.corrupt,
        }
    }
}
