//! Owning store of document versions.
//!
//! Indexes never hold documents: they hold [`DocHandle`]s into the arena.
//! Every stored version of a document gets a fresh handle, so the previous
//! version stays addressable until the operation that replaced it commits.

use emberdb_codec::Document;
use std::collections::HashMap;

/// Handle of one stored document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocHandle(u64);

impl DocHandle {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Arena of documents addressed by [`DocHandle`].
#[derive(Debug, Default)]
pub struct DocArena {
    docs: HashMap<DocHandle, Document>,
    next: u64,
}

impl DocArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document version and returns its handle.
    pub fn insert(&mut self, doc: Document) -> DocHandle {
        let handle = DocHandle(self.next);
        self.next += 1;
        self.docs.insert(handle, doc);
        handle
    }

    /// Returns the document behind `handle`.
    #[must_use]
    pub fn get(&self, handle: DocHandle) -> Option<&Document> {
        self.docs.get(&handle)
    }

    /// Removes and returns the document behind `handle`.
    pub fn remove(&mut self, handle: DocHandle) -> Option<Document> {
        self.docs.remove(&handle)
    }

    /// Number of stored versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Drops every document. Handles are never reused.
    pub fn clear(&mut self) {
        self.docs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberdb_codec::Value;

    #[test]
    fn handles_are_fresh() {
        let mut arena = DocArena::new();
        let a = arena.insert(Document::new());
        let b = arena.insert(Document::new());
        assert_ne!(a, b);

        arena.clear();
        let c = arena.insert(Document::new());
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn insert_get_remove() {
        let mut arena = DocArena::new();
        let mut doc = Document::new();
        doc.insert("x".into(), Value::from(1));
        let h = arena.insert(doc.clone());

        assert_eq!(arena.get(h), Some(&doc));
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.remove(h), Some(doc));
        assert!(arena.get(h).is_none());
        assert!(arena.is_empty());
    }
}
