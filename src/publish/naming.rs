//! Branch names, remote paths and commit messages.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

/// Name of the manifest object written next to batch results.
pub const MANIFEST_FILE_NAME: &str = "experiment_metadata.json";

/// Make `name` usable inside a branch name.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, and a leading `-`
/// is replaced by `model_`.
///
/// ```rust
/// use bench_publish::publish::sanitize_branch_name;
///
/// assert_eq!(sanitize_branch_name("org/llama-7b"), "org_llama-7b");
/// assert_eq!(sanitize_branch_name("-draft"), "model_draft");
/// ```
#[must_use]
pub fn sanitize_branch_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    match safe.strip_prefix('-') {
        Some(rest) => format!("model_{rest}"),
        None => safe,
    }
}

/// Second-resolution stamp used by batch publishes (`YYYYMMDD_HHMMSS`).
#[must_use]
pub fn batch_timestamp(now: &NaiveDateTime) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Day-resolution stamp used by single-file publishes (`YYYYMMDD`).
#[must_use]
pub fn single_timestamp(now: &NaiveDateTime) -> String {
    now.format("%Y%m%d").to_string()
}

/// Branch of a batch publish.
#[must_use]
pub fn batch_branch(prefix: &str, timestamp: &str) -> String {
    format!("{prefix}_{timestamp}")
}

/// Branch of a single-file publish; one per model and day.
#[must_use]
pub fn single_branch(prefix: &str, model_name: Option<&str>, timestamp: &str) -> String {
    match model_name {
        Some(model) => format!("{prefix}_{}_{timestamp}", sanitize_branch_name(model)),
        None => format!("{prefix}_single_{timestamp}"),
    }
}

/// Remote path of a result file.
#[must_use]
pub fn result_path(timestamp: &str, file_name: &str) -> String {
    format!("results/{timestamp}/{file_name}")
}

/// Remote path of the batch manifest.
#[must_use]
pub fn manifest_path(timestamp: &str) -> String {
    result_path(timestamp, MANIFEST_FILE_NAME)
}

/// Final component of `path`, lossily decoded.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Commit message of a batch publish.
#[must_use]
pub fn batch_commit_message(timestamp: &str, uploaded: &[String], failed: &[PathBuf]) -> String {
    let mut message = format!(
        "Benchmark results from {timestamp}\n\nUploaded {} files:\n",
        uploaded.len()
    );
    message.push_str(&bullets(uploaded.iter().cloned()));

    if !failed.is_empty() {
        message.push_str(&format!("\n\nFailed to upload {} files:\n", failed.len()));
        message.push_str(&bullets(failed.iter().map(|p| file_name(p))));
    }
    message
}

/// Commit message of a single-file publish.
#[must_use]
pub fn single_commit_message(file_name: &str, timestamp: &str, model_name: Option<&str>) -> String {
    let mut message = format!("Single result upload: {file_name}\nTimestamp: {timestamp}");
    if let Some(model) = model_name {
        message.push_str(&format!("\nModel: {model}"));
    }
    message
}

fn bullets(items: impl Iterator<Item = String>) -> String {
    items
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
