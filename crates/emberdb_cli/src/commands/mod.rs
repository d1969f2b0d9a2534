//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use emberdb_core::{IdentityTransform, LoadedState, Persistence};
use emberdb_storage::{FileBackend, LogBackend, LogKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens the logs of the datastore at `path` for reading.
pub fn open_backend(path: &Path) -> CliResult<Arc<FileBackend>> {
    if !path.exists() {
        return Err(format!("No datastore found at {}", path.display()).into());
    }
    Ok(Arc::new(FileBackend::open(path)?))
}

/// Replays both logs without rewriting them. Corrupt lines are counted,
/// never fatal.
pub fn replay(backend: Arc<FileBackend>) -> CliResult<LoadedState> {
    let persistence = Persistence::new(
        backend,
        Arc::new(IdentityTransform),
        1.0,
        &mut StdRng::seed_from_u64(0),
    )?;
    let loaded = persistence.load()?;
    debug!(
        total_lines = loaded.total_lines,
        corrupt_lines = loaded.corrupt_lines,
        "replayed logs"
    );
    Ok(loaded)
}

/// Reads every line of one log.
pub fn read_all(backend: &dyn LogBackend, kind: LogKind) -> CliResult<Vec<String>> {
    let mut lines = Vec::new();
    backend.read_lines(kind, &mut |line| lines.push(line.to_string()))?;
    Ok(lines)
}

/// Size of a file in bytes, zero if it does not exist.
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod testing {
    use emberdb_core::{Config, Datastore, IndexOptions, Map, Value};
    use std::path::Path;

    /// Writes a small datastore with one index and some history.
    pub fn seed(path: &Path) {
        let store = Datastore::open(Config::new().filename(path)).unwrap();
        store.ensure_index(IndexOptions::new("n")).unwrap();
        for n in 0..3 {
            let doc: Map = Value::from(serde_json::json!({"_id": format!("d{n}"), "n": n}))
                .into_object()
                .unwrap();
            store.insert(doc).unwrap();
        }
        let query: Map = Value::from(serde_json::json!({"_id": "d0"}))
            .into_object()
            .unwrap();
        store
            .remove(&query, emberdb_core::RemoveOptions::new())
            .unwrap();
    }
}
