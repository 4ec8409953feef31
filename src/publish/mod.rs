//! Publish orchestration
//!
//! Drives one publish through a fixed sequence of states:
//!
//! ```text
//! Init ─> StoreReady ─> BranchReady ─> Uploading ─┬─> Committed ───────┬─> SummaryLogged ─> RunClosed
//!                                                 └─> NoUploadsFailed ─┘
//! ```
//!
//! Store failures before `StoreReady` end the publish without a tracker run.
//! A failed upload is recorded and the loop moves on. Whatever happens after
//! the run is started, including an external interrupt, the run is closed
//! exactly once.
//!
//! ## Usage
//!
//! ```rust
//! use bench_publish::publish::{PublishRequest, PublishSettings, Publisher};
//! use bench_publish::store::MemoryStore;
//! use bench_publish::tracking::{ExperimentTracker, MemoryBackend};
//!
//! # async fn example() {
//! let store = MemoryStore::new("bench");
//! let tracker = ExperimentTracker::<MemoryBackend>::disabled();
//! let publisher = Publisher::new(&store, &tracker, PublishSettings::default());
//!
//! let report = publisher.publish(&PublishRequest::batch("results", Vec::new())).await;
//! assert_eq!(report.exit_code(), 1);
//! # }
//! ```

mod discover;
mod manifest;
mod naming;
mod report;

pub use discover::discover_result_files;
pub use manifest::{ConfigSnapshot, ExperimentInfo, MetadataManifest};
pub use naming::{
    batch_branch, batch_commit_message, batch_timestamp, manifest_path, result_path,
    sanitize_branch_name, single_branch, single_commit_message, single_timestamp,
    MANIFEST_FILE_NAME,
};
pub use report::{PublishReport, PublishStatus};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::config::Config;
use crate::metrics::{aggregate, benchmark_name, parse_records};
use crate::store::{LakeFsStore, VersionedStore};
use crate::tracking::{ExperimentTracker, MlflowBackend, TrackingBackend};

/// States a publish moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    /// Request received
    Init,
    /// Store reachable
    StoreReady,
    /// Branch named (and created unless that failed)
    BranchReady,
    /// Upload loop running
    Uploading,
    /// Commit created
    Committed,
    /// Nothing could be committed
    NoUploadsFailed,
    /// Summary logged to the tracker
    SummaryLogged,
    /// Tracker run closed
    RunClosed,
}

/// How results are grouped into branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishMode {
    /// All result files of a directory on a fresh per-second branch
    Batch,
    /// One file on a per-model, per-day branch
    Single {
        /// Model the result belongs to
        model_name: Option<String>,
    },
}

/// Files to publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Grouping mode
    pub mode: PublishMode,
    /// Local result files, in upload order
    pub files: Vec<PathBuf>,
    /// Directory recorded in the manifest
    pub results_dir: PathBuf,
}

impl PublishRequest {
    /// Publish every file of `results_dir`.
    #[must_use]
    pub fn batch(results_dir: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            mode: PublishMode::Batch,
            files,
            results_dir: results_dir.into(),
        }
    }

    /// Publish one file.
    #[must_use]
    pub fn single(file: impl Into<PathBuf>, model_name: Option<String>) -> Self {
        let file = file.into();
        let results_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            mode: PublishMode::Single { model_name },
            files: vec![file],
            results_dir,
        }
    }
}

/// Store-independent publish settings.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Prefix of created branches
    pub branch_prefix: String,
    /// Ref branches are created from
    pub source_branch: String,
    /// Configuration recorded in the manifest
    pub snapshot: ConfigSnapshot,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PublishSettings {
    fn from(config: &Config) -> Self {
        Self {
            branch_prefix: config.store.branch_prefix.clone(),
            source_branch: config.store.source_branch.clone(),
            snapshot: ConfigSnapshot::from(config),
        }
    }
}

/// Branch and naming decided once the store is ready.
struct Target {
    timestamp: String,
    branch: String,
    run_name: String,
    info: ExperimentInfo,
}

/// Publishes result files to a versioned store, mirroring them into a tracker.
#[derive(Debug)]
pub struct Publisher<'a, S, B> {
    store: &'a S,
    tracker: &'a ExperimentTracker<B>,
    settings: PublishSettings,
}

impl<'a, S, B> Publisher<'a, S, B>
where
    S: VersionedStore,
    B: TrackingBackend,
{
    /// Create a publisher.
    #[must_use]
    pub const fn new(
        store: &'a S,
        tracker: &'a ExperimentTracker<B>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            store,
            tracker,
            settings,
        }
    }

    /// Run a publish to completion.
    pub async fn publish(&self, request: &PublishRequest) -> PublishReport {
        self.publish_until(request, std::future::pending()).await
    }

    /// Run a publish, abandoning it when `shutdown` resolves first.
    ///
    /// On interrupt the pipeline is dropped between two remote calls, the
    /// tracker run is closed as killed and the report says `Interrupted`.
    /// Run creation itself is never abandoned: a run the server created must
    /// be known to the tracker so it can be closed.
    pub async fn publish_until<F>(&self, request: &PublishRequest, shutdown: F) -> PublishReport
    where
        F: Future<Output = ()>,
    {
        let mut report = PublishReport::new(self.store.repository(), request.files.len());
        tokio::pin!(shutdown);

        let interrupted = 'pipeline: {
            let target = tokio::select! {
                biased;
                () = &mut shutdown => break 'pipeline true,
                target = self.prepare(request, &mut report) => target,
            };
            let Some(target) = target else {
                break 'pipeline false;
            };

            self.open_run(request, &target, &mut report).await;

            tokio::select! {
                biased;
                () = &mut shutdown => true,
                () = self.transfer(request, target, &mut report) => false,
            }
        };
        if interrupted {
            tracing::warn!(state = ?report.state, "publish interrupted");
            report.status = PublishStatus::Interrupted;
        }

        report.run_id = self.tracker.active_run_id();
        if self.tracker.end_run(report.status.run_status()).await {
            report.state = PublishState::RunClosed;
        }
        report.metrics_logged = self.tracker.metrics_logged();

        if report.is_success() {
            tracing::info!(
                branch = report.branch.as_deref().unwrap_or_default(),
                commit = report.commit_id.as_deref().unwrap_or_default(),
                uploaded = report.uploaded_files.len(),
                failed = report.failed_files.len(),
                "publish complete"
            );
        } else {
            tracing::error!(status = ?report.status, "publish did not complete");
        }
        report
    }

    /// Probe the store, name and create the branch, collect host info.
    ///
    /// `None` ends the publish with the status already set on `report`.
    async fn prepare(&self, request: &PublishRequest, report: &mut PublishReport) -> Option<Target> {
        if let Err(e) = self.store.check_connection().await {
            tracing::error!(error = %e, "store unavailable");
            report.status = PublishStatus::StoreUnavailable;
            return None;
        }
        report.state = PublishState::StoreReady;

        if request.files.is_empty() {
            tracing::error!(dir = %request.results_dir.display(), "no result files to publish");
            report.status = PublishStatus::NoResults;
            return None;
        }

        let now = Local::now().naive_local();
        let (timestamp, branch, run_name) = match &request.mode {
            PublishMode::Batch => {
                let ts = batch_timestamp(&now);
                let branch = batch_branch(&self.settings.branch_prefix, &ts);
                let run_name = format!("benchmark_{ts}");
                (ts, branch, run_name)
            }
            PublishMode::Single { model_name } => {
                let ts = single_timestamp(&now);
                let branch = single_branch(&self.settings.branch_prefix, model_name.as_deref(), &ts);
                let run_name = format!("single_{ts}");
                (ts, branch, run_name)
            }
        };
        report.timestamp.clone_from(&timestamp);
        report.branch = Some(branch.clone());

        if let Err(e) = self
            .store
            .ensure_branch(&branch, &self.settings.source_branch)
            .await
        {
            tracing::error!(error = %e, branch = %branch, "branch creation failed, continuing");
        }
        report.state = PublishState::BranchReady;

        Some(Target {
            timestamp,
            branch,
            run_name,
            info: ExperimentInfo::collect().await,
        })
    }

    async fn open_run(&self, request: &PublishRequest, target: &Target, report: &mut PublishReport) {
        if !self.tracker.is_enabled() {
            return;
        }
        let tags = BTreeMap::from([
            ("experiment_timestamp".to_string(), target.timestamp.clone()),
            ("store_branch".to_string(), target.branch.clone()),
            ("store_repository".to_string(), self.store.repository().to_string()),
            ("results_count".to_string(), request.files.len().to_string()),
        ]);
        report.run_id = self.tracker.start_run(&target.run_name, tags).await;
    }

    /// Upload loop, manifest, commit and summary.
    async fn transfer(&self, request: &PublishRequest, target: Target, report: &mut PublishReport) {
        let Target {
            timestamp,
            branch,
            info,
            ..
        } = target;
        if self.tracker.is_enabled() {
            self.tracker.log_params(&info.to_params()).await;
        }

        report.state = PublishState::Uploading;
        let mut uploaded_sizes = Vec::with_capacity(request.files.len());
        for local in &request.files {
            if let Some(size) = self.publish_file(local, &branch, &timestamp, report).await {
                uploaded_sizes.push(size);
            }
        }

        if request.mode == PublishMode::Batch && !uploaded_sizes.is_empty() {
            self.publish_manifest(request, info, &uploaded_sizes, &branch, &timestamp, report)
                .await;
        }

        if report.uploaded_files.is_empty() {
            tracing::error!(failed = report.failed_files.len(), "no file uploaded, skipping commit");
            report.status = PublishStatus::NoUploads;
            report.state = PublishState::NoUploadsFailed;
        } else {
            let message = match &request.mode {
                PublishMode::Batch => {
                    batch_commit_message(&timestamp, &report.uploaded_files, &report.failed_files)
                }
                PublishMode::Single { model_name } => {
                    let file = uploaded_sizes
                        .first()
                        .map_or_else(String::new, |(path, _)| {
                            path.rsplit('/').next().unwrap_or(path).to_string()
                        });
                    single_commit_message(&file, &timestamp, model_name.as_deref())
                }
            };
            match self.store.commit(&branch, &message).await {
                Ok(commit) => {
                    report.commit_id = Some(commit.id);
                    report.browse_url = self.store.browse_url(&branch);
                    report.status = PublishStatus::Committed;
                    report.state = PublishState::Committed;
                }
                Err(e) => {
                    tracing::error!(error = %e, "commit failed, uploads left uncommitted");
                    report.status = PublishStatus::CommitFailed;
                    report.state = PublishState::NoUploadsFailed;
                }
            }
        }

        if self.tracker.is_enabled() {
            self.log_summary(report).await;
            report.state = PublishState::SummaryLogged;
        }
    }

    /// Read, aggregate and upload one result file.
    ///
    /// Returns the remote path and size on success.
    async fn publish_file(
        &self,
        local: &Path,
        branch: &str,
        timestamp: &str,
        report: &mut PublishReport,
    ) -> Option<(String, u64)> {
        let file_name = naming::file_name(local);
        let content = match tokio::fs::read(local).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(error = %e, file = %local.display(), "cannot read result file");
                report.failed_files.push(local.to_path_buf());
                return None;
            }
        };

        if self.tracker.is_enabled() {
            let parsed = parse_records(&content);
            report.skipped_lines += parsed.skipped;
            let metrics = aggregate(&parsed.records, &benchmark_name(&file_name));
            tracing::debug!(file = %file_name, metrics = metrics.len(), "aggregated metrics");
            self.tracker.log_metrics(&metrics.into_map(), None).await;
        }

        let remote = result_path(timestamp, &file_name);
        let size = content.len() as u64;
        match self.store.put_object(branch, &remote, content).await {
            Ok(()) => {
                report.uploaded_files.push(remote.clone());
                Some((remote, size))
            }
            Err(e) => {
                tracing::error!(error = %e, "upload failed");
                report.failed_files.push(local.to_path_buf());
                None
            }
        }
    }

    async fn publish_manifest(
        &self,
        request: &PublishRequest,
        info: ExperimentInfo,
        uploaded: &[(String, u64)],
        branch: &str,
        timestamp: &str,
        report: &mut PublishReport,
    ) {
        let manifest = MetadataManifest::new(
            info,
            request.results_dir.display().to_string(),
            uploaded,
            self.settings.snapshot.clone(),
        );
        let content = match manifest.to_json() {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(error = %e, "cannot serialize manifest");
                return;
            }
        };

        let remote = manifest_path(timestamp);
        match self.store.put_object(branch, &remote, content.clone()).await {
            Ok(()) => {
                report.uploaded_files.push(remote.clone());
                report.metadata_path = Some(remote);
            }
            Err(e) => tracing::warn!(error = %e, "manifest upload failed"),
        }

        if self.tracker.is_enabled() {
            if let Err(e) = self.log_manifest_artifact(&content).await {
                tracing::warn!(error = %e, "cannot stage manifest artifact");
            }
        }
    }

    async fn log_manifest_artifact(&self, content: &[u8]) -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(MANIFEST_FILE_NAME);
        tokio::fs::write(&path, content).await?;
        self.tracker.log_artifact(&path, Some("metadata")).await;
        Ok(())
    }

    async fn log_summary(&self, report: &PublishReport) {
        #[allow(clippy::cast_precision_loss)]
        let metrics = BTreeMap::from([
            ("uploaded_files_count".to_string(), report.uploaded_results() as f64),
            ("failed_files_count".to_string(), report.failed_files.len() as f64),
            ("total_files_count".to_string(), report.total_files as f64),
            ("upload_success_rate".to_string(), report.success_rate()),
        ]);
        self.tracker.log_metrics(&metrics, None).await;

        let mut params = BTreeMap::from([
            (
                "store_branch".to_string(),
                report.branch.clone().unwrap_or_default(),
            ),
            ("store_repository".to_string(), report.repository.clone()),
        ]);
        if let Some(commit) = &report.commit_id {
            params.insert("store_commit_id".to_string(), commit.clone());
        }
        self.tracker.log_params(&params).await;
    }
}

/// Publish against the services described by `config`.
///
/// The store is built first; a configuration problem there ends the publish
/// with `StoreUnavailable` before the tracker is contacted. With
/// `use_tracker` unset, or an unusable tracker, the publish is store-only.
pub async fn run_publish<F>(
    config: &Config,
    request: &PublishRequest,
    use_tracker: bool,
    shutdown: F,
) -> PublishReport
where
    F: Future<Output = ()>,
{
    let store = match LakeFsStore::new(&config.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "cannot initialize store client");
            return PublishReport::store_unavailable(&config.store.repository, request.files.len());
        }
    };

    let tracker = if use_tracker {
        ExperimentTracker::<MlflowBackend>::from_config(
            &config.tracker,
            config.experiment.default_tags.clone(),
        )
        .await
    } else {
        tracing::info!("experiment tracking disabled");
        ExperimentTracker::disabled()
    };

    Publisher::new(&store, &tracker, PublishSettings::from(config))
        .publish_until(request, shutdown)
        .await
}
