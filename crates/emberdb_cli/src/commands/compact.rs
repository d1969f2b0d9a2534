//! Compact command implementation.

use super::{file_size, CliResult};
use emberdb_core::{Config, Datastore};
use std::path::Path;
use tracing::info;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Live documents.
    pub documents: usize,
    /// Data log size before compaction.
    pub bytes_before: u64,
    /// Data log size after compaction.
    pub bytes_after: u64,
}

/// Opens the datastore, which replays and rewrites both logs.
pub fn compact(path: &Path) -> CliResult<CompactStats> {
    if !path.exists() {
        return Err(format!("No datastore found at {}", path.display()).into());
    }
    let bytes_before = file_size(path);
    let store = Datastore::open(Config::new().filename(path))?;
    let documents = store.len()?;
    drop(store);
    let bytes_after = file_size(path);
    info!(documents, bytes_before, bytes_after, "compacted datastore");
    Ok(CompactStats {
        documents,
        bytes_before,
        bytes_after,
    })
}

/// Runs the compact command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Compacting datastore at {}", path.display());
    let stats = compact(path)?;
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("  Documents:   {}", stats.documents);
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seed;
    use tempfile::TempDir;

    #[test]
    fn drops_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        seed(&path);

        let stats = compact(&path).unwrap();
        assert_eq!(stats.documents, 2);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
