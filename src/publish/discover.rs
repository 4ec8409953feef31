//! Result-file discovery.

use std::path::{Path, PathBuf};

/// Every `*.jsonl` file directly inside `results_dir`, sorted by path.
///
/// A missing directory yields an empty list and an error log; the caller
/// then fails the publish before touching the store.
#[must_use]
pub fn discover_result_files(results_dir: &Path) -> Vec<PathBuf> {
    if !results_dir.is_dir() {
        tracing::error!(dir = %results_dir.display(), "results directory not found");
        return Vec::new();
    }

    let escaped = glob::Pattern::escape(&results_dir.to_string_lossy());
    let pattern = format!("{escaped}/*.jsonl");
    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, pattern = %pattern, "invalid result file pattern");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .collect();
    files.sort();

    if files.is_empty() {
        tracing::warn!(pattern = %pattern, "no result files found");
    } else {
        tracing::info!(count = files.len(), dir = %results_dir.display(), "found result files");
    }
    files
}
