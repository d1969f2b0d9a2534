//! Inspect command implementation.

use super::{file_size, open_backend, read_all, replay, CliResult};
use emberdb_storage::LogKind;
use serde::Serialize;
use std::path::Path;

/// Datastore inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data log path.
    pub path: String,
    /// Data log size in bytes.
    pub data_size: u64,
    /// Index log size in bytes.
    pub index_size: u64,
    /// Lines in the data log.
    pub data_lines: usize,
    /// Lines in the index log.
    pub index_lines: usize,
    /// Live documents after replay.
    pub document_count: usize,
    /// Lines that failed to decode.
    pub corrupt_lines: usize,
    /// Secondary indexes.
    pub indexes: Vec<IndexSummary>,
}

/// One secondary index.
#[derive(Debug, Serialize)]
pub struct IndexSummary {
    /// Indexed field.
    pub field: String,
    /// Unique constraint.
    pub unique: bool,
    /// Sparse index.
    pub sparse: bool,
    /// TTL in seconds, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<f64>,
}

/// Collects the statistics without modifying the logs.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let backend = open_backend(path)?;
    let data_lines = read_all(backend.as_ref(), LogKind::Data)?.len();
    let index_lines = read_all(backend.as_ref(), LogKind::Index)?.len();
    let index_path = backend.log_path(LogKind::Index).to_path_buf();
    let loaded = replay(backend)?;

    Ok(InspectResult {
        path: path.display().to_string(),
        data_size: file_size(path),
        index_size: file_size(&index_path),
        data_lines,
        index_lines,
        document_count: loaded.documents.len(),
        corrupt_lines: loaded.corrupt_lines,
        indexes: loaded
            .indexes
            .into_iter()
            .map(|options| IndexSummary {
                field: options.field_name,
                unique: options.unique,
                sparse: options.sparse,
                expire_after_seconds: options.expire_after_seconds,
            })
            .collect(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let result = inspect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("EmberDB Datastore Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Logs:");
    println!("  Data log:  {} ({} lines)", format_size(result.data_size), result.data_lines);
    println!("  Index log: {} ({} lines)", format_size(result.index_size), result.index_lines);
    println!();
    println!("Documents: {}", result.document_count);
    if result.corrupt_lines > 0 {
        println!("Corrupt lines: {}", result.corrupt_lines);
    }

    if !result.indexes.is_empty() {
        println!();
        println!("Indexes:");
        for index in &result.indexes {
            let mut flags = Vec::new();
            if index.unique {
                flags.push("unique".to_string());
            }
            if index.sparse {
                flags.push("sparse".to_string());
            }
            if let Some(ttl) = index.expire_after_seconds {
                flags.push(format!("ttl {ttl}s"));
            }
            println!("  {} {}", index.field, flags.join(", "));
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seed;
    use tempfile::TempDir;

    #[test]
    fn reports_live_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        seed(&path);

        let result = inspect(&path).unwrap();
        assert_eq!(result.document_count, 2);
        assert_eq!(result.data_lines, 4);
        assert_eq!(result.index_lines, 1);
        assert_eq!(result.corrupt_lines, 0);
        assert_eq!(result.indexes.len(), 1);
        assert_eq!(result.indexes[0].field, "n");
        assert!(result.data_size > 0);
    }

    #[test]
    fn missing_store() {
        let dir = TempDir::new().unwrap();
        assert!(inspect(&dir.path().join("nothing.db")).is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(10), "10 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
