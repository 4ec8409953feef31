//! In-process tracking backend.
//!
//! Keeps everything in an [`ExperimentStore`]. Used when no tracking server
//! is wanted and throughout the tests, where faults can be injected.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::store::ExperimentStore;
use super::{ArtifactRecord, MetricRecord, RunRecord, RunStatus, TrackingBackend};
use crate::{Error, Result};

/// Tracking backend holding runs in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<ExperimentStore>,
    unreachable: AtomicBool,
    fail_metrics: AtomicBool,
    next_run: AtomicUsize,
    create_delay: Option<Duration>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call as if the server were down.
    #[must_use]
    pub fn unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    /// Fail metric logging only.
    #[must_use]
    pub fn with_failing_metrics(self) -> Self {
        self.fail_metrics.store(true, Ordering::SeqCst);
        self
    }

    /// Answer run creation only after `delay`; the run exists as soon as
    /// the call starts.
    #[must_use]
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ExperimentStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn probe(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Connectivity {
                service: "memory",
                message: "tracker marked unreachable".to_string(),
            });
        }
        Ok(())
    }

    /// Snapshot of a run.
    #[must_use]
    pub fn run(&self, run_id: &str) -> Option<RunRecord> {
        self.lock().get_run(run_id).cloned()
    }

    /// Number of runs created.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.lock().run_count()
    }

    /// Metrics of a run, ordered by step then key.
    #[must_use]
    pub fn metrics(&self, run_id: &str) -> Vec<MetricRecord> {
        self.lock().get_metrics_for_run(run_id)
    }

    /// Artifacts of a run.
    #[must_use]
    pub fn artifacts(&self, run_id: &str) -> Vec<ArtifactRecord> {
        self.lock().get_artifacts_for_run(run_id)
    }

    fn with_run<T>(&self, run_id: &str, f: impl FnOnce(&mut RunRecord) -> T) -> Result<T> {
        self.probe()?;
        let mut store = self.lock();
        let run = store
            .get_run_mut(run_id)
            .ok_or_else(|| Error::Tracker(format!("run '{run_id}' not found")))?;
        Ok(f(run))
    }
}

impl TrackingBackend for MemoryBackend {
    async fn ensure_experiment(&self, name: &str) -> Result<String> {
        self.probe()?;
        Ok(self.lock().get_or_create_experiment(name))
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.probe()?;
        let run_id = format!("run-{}", self.next_run.fetch_add(1, Ordering::SeqCst));
        self.lock().add_run(RunRecord::new(
            run_id.clone(),
            experiment_id,
            run_name,
            tags.clone(),
        ));
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(run_id)
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()> {
        self.with_run(run_id, |run| run.log_params(params))
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> Result<usize> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(Error::Tracker("injected metric failure".to_string()));
        }
        self.with_run(run_id, |_| ())?;
        let mut store = self.lock();
        let mut accepted = 0;
        for (key, value) in metrics.iter().filter(|(_, v)| v.is_finite()) {
            store.add_metric(MetricRecord::new(run_id, key.clone(), step, *value));
            accepted += 1;
        }
        Ok(accepted)
    }

    async fn log_artifact(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        self.with_run(run_id, |_| ())?;
        let size = std::fs::metadata(local_path)?.len();
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Tracker(format!("{} has no file name", local_path.display())))?;
        self.lock()
            .add_artifact(ArtifactRecord::new(run_id, artifact_path, file_name, size));
        Ok(())
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let changed = self.with_run(run_id, |run| run.complete(status))?;
        if !changed {
            return Err(Error::Tracker(format!("run '{run_id}' already ended")));
        }
        Ok(())
    }
}
