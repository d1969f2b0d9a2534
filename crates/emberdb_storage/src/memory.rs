//! In-memory storage backend for testing.

use crate::backend::{check_line, LogBackend, LogKind};
use crate::error::StorageResult;
use parking_lot::RwLock;

/// An in-memory log backend.
///
/// This backend keeps both logs as vectors of lines and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Example
///
/// ```rust
/// use emberdb_storage::{InMemoryBackend, LogBackend, LogKind};
///
/// let backend = InMemoryBackend::new();
/// backend.append_index_line("directive").unwrap();
/// assert_eq!(backend.lines(LogKind::Index), vec!["directive".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<String>>,
    index: RwLock<Vec<String>>,
}

impl InMemoryBackend {
    /// Creates a new backend with two empty logs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing lines.
    ///
    /// Useful for testing load and corruption scenarios.
    #[must_use]
    pub fn with_lines(data: Vec<String>, index: Vec<String>) -> Self {
        Self {
            data: RwLock::new(data),
            index: RwLock::new(index),
        }
    }

    /// Returns a copy of all lines in the given log.
    #[must_use]
    pub fn lines(&self, kind: LogKind) -> Vec<String> {
        self.log(kind).read().clone()
    }

    /// Clears both logs.
    pub fn clear(&self) {
        self.data.write().clear();
        self.index.write().clear();
    }

    fn log(&self, kind: LogKind) -> &RwLock<Vec<String>> {
        match kind {
            LogKind::Data => &self.data,
            LogKind::Index => &self.index,
        }
    }
}

impl LogBackend for InMemoryBackend {
    fn init(&self) -> StorageResult<()> {
        // Nothing to create or recover
        Ok(())
    }

    fn read_lines(&self, kind: LogKind, emit: &mut dyn FnMut(&str)) -> StorageResult<()> {
        for line in self.log(kind).read().iter() {
            emit(line);
        }
        Ok(())
    }

    fn rewrite(&self, kind: LogKind, lines: &mut dyn Iterator<Item = String>) -> StorageResult<()> {
        let mut replacement = Vec::new();
        for line in lines {
            check_line(&line)?;
            replacement.push(line);
        }
        *self.log(kind).write() = replacement;
        Ok(())
    }

    fn append_line(&self, kind: LogKind, line: &str) -> StorageResult<()> {
        check_line(line)?;
        self.log(kind).write().push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use proptest::prelude::*;

    fn read_all(backend: &InMemoryBackend, kind: LogKind) -> Vec<String> {
        let mut lines = Vec::new();
        backend
            .read_lines(kind, &mut |line| lines.push(line.to_string()))
            .unwrap();
        lines
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(read_all(&backend, LogKind::Data).is_empty());
        assert!(read_all(&backend, LogKind::Index).is_empty());
    }

    #[test]
    fn memory_logs_are_independent() {
        let backend = InMemoryBackend::new();
        backend.append_data_line("d").unwrap();
        backend.append_index_line("i").unwrap();

        assert_eq!(backend.lines(LogKind::Data), vec!["d"]);
        assert_eq!(backend.lines(LogKind::Index), vec!["i"]);
    }

    #[test]
    fn memory_rewrite_replaces_everything() {
        let backend = InMemoryBackend::with_lines(vec!["a".into(), "b".into()], vec![]);
        backend
            .rewrite_data_log(&mut vec!["c".to_string()].into_iter())
            .unwrap();
        assert_eq!(backend.lines(LogKind::Data), vec!["c"]);
    }

    #[test]
    fn memory_rewrite_with_bad_line_keeps_old_content() {
        let backend = InMemoryBackend::with_lines(vec!["a".into()], vec![]);
        let result = backend.rewrite_data_log(&mut vec!["x\ny".to_string()].into_iter());
        assert!(matches!(result, Err(StorageError::InvalidLine { .. })));
        assert_eq!(backend.lines(LogKind::Data), vec!["a"]);
    }

    #[test]
    fn memory_clear() {
        let backend = InMemoryBackend::with_lines(vec!["a".into()], vec!["b".into()]);
        backend.clear();
        assert!(backend.lines(LogKind::Data).is_empty());
        assert!(backend.lines(LogKind::Index).is_empty());
    }

    proptest! {
        #[test]
        fn appended_lines_read_back_in_order(lines in prop::collection::vec("[^\n]{0,40}", 0..50)) {
            let backend = InMemoryBackend::new();
            for line in &lines {
                backend.append_data_line(line).unwrap();
            }
            prop_assert_eq!(read_all(&backend, LogKind::Data), lines);
        }
    }
}
