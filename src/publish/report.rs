//! End-of-run report

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::PublishState;
use crate::tracking::RunStatus;

/// Outcome of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// Not finished yet
    Pending,
    /// A commit was created
    Committed,
    /// Store could not be built or reached
    StoreUnavailable,
    /// No candidate files
    NoResults,
    /// Every upload failed, nothing to commit
    NoUploads,
    /// Uploads succeeded but the commit failed
    CommitFailed,
    /// Stopped by an external interrupt
    Interrupted,
}

impl PublishStatus {
    /// Process exit code: 0 success, 130 interrupt, 1 otherwise.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Committed => 0,
            Self::Interrupted => 130,
            _ => 1,
        }
    }

    /// Terminal status of the tracker run.
    #[must_use]
    pub const fn run_status(self) -> RunStatus {
        match self {
            Self::Committed => RunStatus::Finished,
            Self::Interrupted => RunStatus::Killed,
            _ => RunStatus::Failed,
        }
    }
}

/// What a publish did.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    /// Outcome
    pub status: PublishStatus,
    /// Last state reached
    pub state: PublishState,
    /// Timestamp stamped into branch and paths
    pub timestamp: String,
    /// Repository published to
    pub repository: String,
    /// Branch published to, once named
    pub branch: Option<String>,
    /// Number of candidate result files
    pub total_files: usize,
    /// Remote paths of successful uploads, manifest included
    pub uploaded_files: Vec<String>,
    /// Local result files that could not be read or uploaded
    pub failed_files: Vec<PathBuf>,
    /// Remote path of the manifest, once uploaded
    pub metadata_path: Option<String>,
    /// Commit created, if any
    pub commit_id: Option<String>,
    /// Web UI link to the branch
    pub browse_url: Option<String>,
    /// Tracker run, if one was started
    pub run_id: Option<String>,
    /// Metric values accepted by the tracker
    pub metrics_logged: usize,
    /// Malformed result lines skipped during aggregation
    pub skipped_lines: usize,
}

impl PublishReport {
    pub(crate) fn new(repository: impl Into<String>, total_files: usize) -> Self {
        Self {
            status: PublishStatus::Pending,
            state: PublishState::Init,
            timestamp: String::new(),
            repository: repository.into(),
            branch: None,
            total_files,
            uploaded_files: Vec::new(),
            failed_files: Vec::new(),
            metadata_path: None,
            commit_id: None,
            browse_url: None,
            run_id: None,
            metrics_logged: 0,
            skipped_lines: 0,
        }
    }

    /// Report of a publish that stopped before the store could be used.
    #[must_use]
    pub fn store_unavailable(repository: impl Into<String>, total_files: usize) -> Self {
        let mut report = Self::new(repository, total_files);
        report.status = PublishStatus::StoreUnavailable;
        report
    }

    /// Whether a commit was created.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PublishStatus::Committed
    }

    /// Process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// Result files uploaded, manifest excluded.
    #[must_use]
    pub fn uploaded_results(&self) -> usize {
        self.uploaded_files.len() - usize::from(self.metadata_path.is_some())
    }

    /// Fraction of result files uploaded (0 without candidates).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.uploaded_results() as f64 / self.total_files as f64
    }
}

impl fmt::Display for PublishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.status {
            PublishStatus::Committed => "published",
            PublishStatus::Pending => "pending",
            PublishStatus::StoreUnavailable => "failed: store unavailable",
            PublishStatus::NoResults => "failed: no result files",
            PublishStatus::NoUploads => "failed: no file uploaded",
            PublishStatus::CommitFailed => "failed: commit rejected",
            PublishStatus::Interrupted => "interrupted",
        };
        writeln!(f, "Publish {verdict} ({:?})", self.state)?;
        writeln!(f, "  repository:  {}", self.repository)?;
        if let Some(branch) = &self.branch {
            writeln!(f, "  branch:      {branch}")?;
        }
        writeln!(
            f,
            "  uploaded:    {}/{} result files{}",
            self.uploaded_results(),
            self.total_files,
            if self.metadata_path.is_some() { " + manifest" } else { "" }
        )?;
        if !self.failed_files.is_empty() {
            writeln!(f, "  failed:      {}", self.failed_files.len())?;
            for path in &self.failed_files {
                writeln!(f, "    - {}", super::naming::file_name(path))?;
            }
        }
        if let Some(commit) = &self.commit_id {
            writeln!(f, "  commit:      {commit}")?;
        }
        if let Some(url) = &self.browse_url {
            writeln!(f, "  browse:      {url}")?;
        }
        if let Some(run) = &self.run_id {
            writeln!(f, "  tracker run: {run} ({} metrics)", self.metrics_logged)?;
        }
        if self.skipped_lines > 0 {
            writeln!(f, "  skipped:     {} malformed lines", self.skipped_lines)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(PublishStatus::Committed.exit_code(), 0);
        assert_eq!(PublishStatus::NoResults.exit_code(), 1);
        assert_eq!(PublishStatus::CommitFailed.exit_code(), 1);
        assert_eq!(PublishStatus::Interrupted.exit_code(), 130);
    }

    #[test]
    fn test_run_status_mapping() {
        assert_eq!(PublishStatus::Committed.run_status(), RunStatus::Finished);
        assert_eq!(PublishStatus::NoUploads.run_status(), RunStatus::Failed);
        assert_eq!(PublishStatus::Interrupted.run_status(), RunStatus::Killed);
    }

    #[test]
    fn test_success_rate_excludes_manifest() {
        let mut report = PublishReport::new("bench", 3);
        report.uploaded_files = vec![
            "results/t/a.jsonl".to_string(),
            "results/t/b.jsonl".to_string(),
            "results/t/experiment_metadata.json".to_string(),
        ];
        report.metadata_path = Some("results/t/experiment_metadata.json".to_string());
        assert_eq!(report.uploaded_results(), 2);
        assert!((report.success_rate() - 2.0 / 3.0).abs() < 1e-12);
        assert!((PublishReport::new("bench", 0).success_rate()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display_lists_failures() {
        let mut report = PublishReport::new("bench", 2);
        report.status = PublishStatus::Committed;
        report.branch = Some("experiment_t".to_string());
        report.uploaded_files = vec!["results/t/a.jsonl".to_string()];
        report.failed_files = vec![PathBuf::from("/tmp/b.jsonl")];
        report.commit_id = Some("c0ffee".to_string());

        let text = report.to_string();
        assert!(text.starts_with("Publish published"));
        assert!(text.contains("1/2 result files"));
        assert!(text.contains("- b.jsonl"));
        assert!(text.contains("commit:      c0ffee"));
    }
}
