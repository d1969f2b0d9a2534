//! Options and results of update and remove calls.

use emberdb_codec::Document;

/// Options for [`Datastore::update`](super::Datastore::update).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first one.
    pub multi: bool,
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Return the updated documents in [`UpdateResult::documents`].
    pub return_updated_docs: bool,
}

impl UpdateOptions {
    /// Single-document update without upsert.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates every match.
    #[must_use]
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    /// Inserts when nothing matches.
    #[must_use]
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    /// Returns copies of the updated documents.
    #[must_use]
    pub fn return_updated_docs(mut self) -> Self {
        self.return_updated_docs = true;
        self
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Documents updated, or 1 for an upsert insertion.
    pub num_affected: usize,
    /// True if the call inserted a document.
    pub upsert: bool,
    /// The inserted document for an upsert, the updated documents when
    /// requested, otherwise empty.
    pub documents: Vec<Document>,
}

/// Options for [`Datastore::remove`](super::Datastore::remove).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove every matching document instead of the first one.
    pub multi: bool,
}

impl RemoveOptions {
    /// Removes the first match only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every match.
    #[must_use]
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }
}
