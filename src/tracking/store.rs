//! Run bookkeeping of [`MemoryBackend`](super::MemoryBackend).

use std::collections::HashMap;

use super::{ArtifactRecord, MetricRecord, RunRecord};

/// Experiments, runs, metric points and artifacts of one process.
///
/// Experiment IDs are assigned densely in creation order. Metric points are
/// appended as logged and ordered on read.
#[derive(Debug, Default)]
pub struct ExperimentStore {
    experiments: HashMap<String, String>,
    runs: HashMap<String, RunRecord>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
}

impl ExperimentStore {
    /// Create a new empty experiment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// ID of the experiment called `name`, creating it when missing.
    pub fn get_or_create_experiment(&mut self, name: &str) -> String {
        let next_id = self.experiments.len().to_string();
        self.experiments
            .entry(name.to_string())
            .or_insert(next_id)
            .clone()
    }

    /// ID of the experiment called `name`, if it exists.
    #[must_use]
    pub fn find_experiment(&self, name: &str) -> Option<&str> {
        self.experiments.get(name).map(String::as_str)
    }

    /// Add a run to the store.
    pub fn add_run(&mut self, run: RunRecord) {
        self.runs.insert(run.run_id().to_string(), run);
    }

    /// Get a run by ID.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.get(run_id)
    }

    /// Get a run by ID for mutation.
    pub fn get_run_mut(&mut self, run_id: &str) -> Option<&mut RunRecord> {
        self.runs.get_mut(run_id)
    }

    /// Add a metric to the store.
    pub fn add_metric(&mut self, metric: MetricRecord) {
        self.metrics.push(metric);
    }

    /// Every metric of a run, ordered by step then key.
    #[must_use]
    pub fn get_metrics_for_run(&self, run_id: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .metrics
            .iter()
            .filter(|m| m.run_id() == run_id)
            .cloned()
            .collect();

        metrics.sort_by(|a, b| a.step().cmp(&b.step()).then_with(|| a.key().cmp(b.key())));

        metrics
    }

    /// Add an artifact to the store.
    pub fn add_artifact(&mut self, artifact: ArtifactRecord) {
        self.artifacts.push(artifact);
    }

    /// Artifacts of a run in logging order.
    #[must_use]
    pub fn get_artifacts_for_run(&self, run_id: &str) -> Vec<ArtifactRecord> {
        self.artifacts
            .iter()
            .filter(|a| a.run_id() == run_id)
            .cloned()
            .collect()
    }
}
