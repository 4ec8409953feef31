//! Run Record - one tracked publish session

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal or live status of a run, as understood by MLflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is currently recording.
    Running,
    /// Run completed successfully.
    Finished,
    /// Run ended with a failure.
    Failed,
    /// Run was interrupted by the user or the system.
    Killed,
}

impl RunStatus {
    /// Wire name used by the tracking server.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }

    /// Whether the run can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Run Record correlates tags, params and lifecycle of one run.
///
/// Runs are created in `Running` state; [`RunRecord::complete`] moves them to
/// a terminal status exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    run_id: String,
    experiment_id: String,
    run_name: String,
    status: RunStatus,
    tags: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Create a running record.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        run_name: impl Into<String>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            run_name: run_name.into(),
            status: RunStatus::Running,
            tags,
            params: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the display name.
    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Tags attached at creation.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Params logged so far.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End timestamp, once the run is terminal.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Record params; later values overwrite earlier ones.
    pub fn log_params(&mut self, params: &BTreeMap<String, String>) {
        self.params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Move to a terminal status.
    ///
    /// Returns `false` (and changes nothing) if the run already ended.
    pub fn complete(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let mut run = RunRecord::new("run-1", "exp-1", "benchmark_1", BTreeMap::new());
        assert_eq!(run.status(), RunStatus::Running);
        assert!(run.ended_at().is_none());

        assert!(run.complete(RunStatus::Finished));
        assert_eq!(run.status(), RunStatus::Finished);
        assert!(run.ended_at().is_some());
    }

    #[test]
    fn test_complete_only_once() {
        let mut run = RunRecord::new("run-1", "exp-1", "benchmark_1", BTreeMap::new());
        assert!(run.complete(RunStatus::Killed));
        assert!(!run.complete(RunStatus::Finished));
        assert_eq!(run.status(), RunStatus::Killed);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(RunStatus::Finished.as_str(), "FINISHED");
        assert_eq!(
            serde_json::to_string(&RunStatus::Killed).unwrap(),
            "\"KILLED\""
        );
    }
}
