//! Dump command implementation.

use super::{open_backend, read_all, CliResult};
use emberdb_storage::LogKind;
use std::path::Path;

/// Returns up to `limit` raw lines of the data log, or of the index log
/// when `index` is set.
pub fn dump(path: &Path, limit: Option<usize>, index: bool) -> CliResult<Vec<String>> {
    let backend = open_backend(path)?;
    let kind = if index { LogKind::Index } else { LogKind::Data };
    let mut lines = read_all(backend.as_ref(), kind)?;
    if let Some(limit) = limit {
        lines.truncate(limit);
    }
    Ok(lines)
}

/// Runs the dump command.
pub fn run(path: &Path, limit: Option<usize>, index: bool) -> CliResult<()> {
    for (number, line) in dump(path, limit, index)?.iter().enumerate() {
        println!("{:>6}  {line}", number + 1);
    }
    Ok(())
}
