//! Experiment tracking
//!
//! Two layers:
//!
//! - [`TrackingBackend`]: the fallible seam to a tracking service
//!   ([`MlflowBackend`] over HTTP, [`MemoryBackend`] in process).
//! - [`ExperimentTracker`]: a best-effort adapter around a backend. Every
//!   failure is logged and swallowed, and an unreachable backend turns the
//!   tracker into a no-op instead of failing the caller.
//!
//! ```text
//! ExperimentTracker ──> TrackingBackend
//!        │                   ├── MlflowBackend (REST)
//!        │                   └── MemoryBackend ──> ExperimentStore
//!        └── active run slot (closed exactly once)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use bench_publish::tracking::{ExperimentTracker, MemoryBackend, RunStatus};
//!
//! # async fn example() {
//! let tracker =
//!     ExperimentTracker::connect(MemoryBackend::new(), "spec-bench", BTreeMap::new()).await;
//!
//! let run_id = tracker.start_run("benchmark_1", BTreeMap::new()).await;
//! assert!(run_id.is_some());
//!
//! let metrics = BTreeMap::from([("mt_bench_acceptance_rate".to_string(), 0.8)]);
//! tracker.log_metrics(&metrics, None).await;
//!
//! assert!(tracker.end_run(RunStatus::Finished).await);
//! assert!(!tracker.end_run(RunStatus::Finished).await);
//! # }
//! ```

mod artifact_record;
mod memory;
mod metric_record;
mod mlflow;
mod run_record;
mod store;

pub use artifact_record::ArtifactRecord;
pub use memory::MemoryBackend;
pub use metric_record::MetricRecord;
pub use mlflow::MlflowBackend;
pub use run_record::{RunRecord, RunStatus};
pub use store::ExperimentStore;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::Result;

/// Fallible interface to a run-based tracking service.
pub trait TrackingBackend: Send + Sync {
    /// Resolve (or create) the experiment called `name`, returning its ID.
    fn ensure_experiment(&self, name: &str) -> impl Future<Output = Result<String>> + Send;

    /// Create a running run, returning its ID.
    fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Log string params.
    fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Log numeric metrics at `step`, returning how many values were stored.
    ///
    /// Non-finite values are dropped rather than rejected.
    fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Upload a local file into the run's artifact root.
    fn log_artifact(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Move the run to a terminal status.
    fn end_run(&self, run_id: &str, status: RunStatus) -> impl Future<Output = Result<()>> + Send;
}

/// Best-effort tracker around an optional backend.
///
/// The tracker owns the active run, so whoever holds it can close the run
/// on any exit path. All methods take `&self`.
pub struct ExperimentTracker<B> {
    backend: Option<B>,
    experiment_id: String,
    default_tags: BTreeMap<String, String>,
    active_run: Mutex<Option<String>>,
    metrics_logged: AtomicUsize,
}

impl<B> std::fmt::Debug for ExperimentTracker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentTracker")
            .field("enabled", &self.backend.is_some())
            .field("experiment_id", &self.experiment_id)
            .field("active_run", &self.active_run_id())
            .finish_non_exhaustive()
    }
}

impl<B> ExperimentTracker<B> {
    /// A tracker that ignores every call.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            backend: None,
            experiment_id: String::new(),
            default_tags: BTreeMap::new(),
            active_run: Mutex::new(None),
            metrics_logged: AtomicUsize::new(0),
        }
    }

    /// Whether calls reach a backend.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// The backend, when enabled.
    #[must_use]
    pub const fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Experiment the runs belong to (empty when disabled).
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// ID of the open run, if any.
    #[must_use]
    pub fn active_run_id(&self) -> Option<String> {
        self.active_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of metric values successfully logged.
    #[must_use]
    pub fn metrics_logged(&self) -> usize {
        self.metrics_logged.load(Ordering::SeqCst)
    }

    fn enabled_run(&self) -> Option<(&B, String)> {
        let backend = self.backend.as_ref()?;
        let run_id = self.active_run_id()?;
        Some((backend, run_id))
    }
}

impl<B: TrackingBackend> ExperimentTracker<B> {
    /// Resolve `experiment_name` on `backend`.
    ///
    /// An unreachable or rejecting backend yields a disabled tracker; this
    /// never fails.
    pub async fn connect(
        backend: B,
        experiment_name: &str,
        default_tags: BTreeMap<String, String>,
    ) -> Self {
        match backend.ensure_experiment(experiment_name).await {
            Ok(experiment_id) => {
                tracing::info!(
                    experiment = experiment_name,
                    experiment_id = %experiment_id,
                    "experiment tracking enabled"
                );
                Self {
                    backend: Some(backend),
                    experiment_id,
                    default_tags,
                    active_run: Mutex::new(None),
                    metrics_logged: AtomicUsize::new(0),
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    experiment = experiment_name,
                    "experiment tracker unavailable, continuing without tracking"
                );
                Self::disabled()
            }
        }
    }

    /// Open a run tagged with the default tags overlaid by `tags`.
    ///
    /// Returns the already open run if there is one, and `None` when the
    /// tracker is disabled or the backend refused.
    pub async fn start_run(&self, run_name: &str, tags: BTreeMap<String, String>) -> Option<String> {
        let backend = self.backend.as_ref()?;
        if let Some(run_id) = self.active_run_id() {
            tracing::warn!(run_id = %run_id, "run already active, reusing it");
            return Some(run_id);
        }

        let mut all_tags = self.default_tags.clone();
        all_tags.extend(tags);

        match backend
            .create_run(&self.experiment_id, run_name, &all_tags)
            .await
        {
            Ok(run_id) => {
                tracing::info!(run_id = %run_id, run_name, "started tracking run");
                *self.active_run.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(run_id.clone());
                Some(run_id)
            }
            Err(e) => {
                tracing::error!(error = %e, run_name, "failed to start tracking run");
                None
            }
        }
    }

    /// Log params on the open run.
    pub async fn log_params(&self, params: &BTreeMap<String, String>) {
        let Some((backend, run_id)) = self.enabled_run() else {
            return;
        };
        if let Err(e) = backend.log_params(&run_id, params).await {
            tracing::error!(error = %e, count = params.len(), "failed to log params");
        }
    }

    /// Log metrics on the open run (`step` defaults to 0).
    pub async fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: Option<u64>) {
        let Some((backend, run_id)) = self.enabled_run() else {
            return;
        };
        if metrics.is_empty() {
            return;
        }
        match backend
            .log_metrics(&run_id, metrics, step.unwrap_or(0))
            .await
        {
            Ok(accepted) => {
                if accepted < metrics.len() {
                    tracing::warn!(
                        dropped = metrics.len() - accepted,
                        "tracker dropped non-finite metric values"
                    );
                }
                self.metrics_logged.fetch_add(accepted, Ordering::SeqCst);
            }
            Err(e) => tracing::error!(error = %e, count = metrics.len(), "failed to log metrics"),
        }
    }

    /// Attach a local file to the open run.
    pub async fn log_artifact(&self, local_path: &Path, artifact_path: Option<&str>) {
        let Some((backend, run_id)) = self.enabled_run() else {
            return;
        };
        if let Err(e) = backend
            .log_artifact(&run_id, local_path, artifact_path)
            .await
        {
            tracing::error!(
                error = %e,
                path = %local_path.display(),
                "failed to log artifact"
            );
        }
    }

    /// Close the open run with `status`.
    ///
    /// The run slot is emptied before the backend is called, so a run is
    /// closed at most once. Returns whether a run was open.
    pub async fn end_run(&self, status: RunStatus) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        let run_id = self
            .active_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(run_id) = run_id else {
            return false;
        };

        match backend.end_run(&run_id, status).await {
            Ok(()) => tracing::info!(run_id = %run_id, status = status.as_str(), "tracking run ended"),
            Err(e) => tracing::error!(error = %e, run_id = %run_id, "failed to end tracking run"),
        }
        true
    }
}
