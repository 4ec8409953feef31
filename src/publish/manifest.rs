//! Experiment metadata manifest
//!
//! Describes the environment and configuration of a batch publish. It is
//! uploaded next to the results and attached to the tracker run.

use std::collections::BTreeMap;

use chrono::Local;
use serde::Serialize;

use crate::config::Config;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Host information captured at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentInfo {
    /// Local time, RFC 3339
    pub timestamp: String,
    /// Operating system and architecture
    pub platform: String,
    /// Version of the publishing tool
    pub runtime_version: String,
    /// Whether an accelerator was detected
    pub accelerator_available: bool,
    /// Number of accelerators, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_count: Option<usize>,
    /// Accelerator model names, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_names: Option<Vec<String>>,
}

impl ExperimentInfo {
    /// Collect host information.
    ///
    /// Accelerators are queried with `nvidia-smi`; a missing or failing tool
    /// means none are available.
    pub async fn collect() -> Self {
        let names = query_accelerators().await;
        Self::with_accelerators(names)
    }

    /// Host information with an explicit accelerator list.
    #[must_use]
    pub fn with_accelerators(names: Vec<String>) -> Self {
        let available = !names.is_empty();
        Self {
            timestamp: Local::now().to_rfc3339(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            runtime_version: concat!("bench-publish ", env!("CARGO_PKG_VERSION")).to_string(),
            accelerator_available: available,
            accelerator_count: available.then_some(names.len()),
            accelerator_names: available.then_some(names),
        }
    }

    /// Flatten into tracker params.
    #[must_use]
    pub fn to_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::from([
            ("timestamp".to_string(), self.timestamp.clone()),
            ("platform".to_string(), self.platform.clone()),
            ("runtime_version".to_string(), self.runtime_version.clone()),
            (
                "accelerator_available".to_string(),
                self.accelerator_available.to_string(),
            ),
        ]);
        if let Some(count) = self.accelerator_count {
            params.insert("accelerator_count".to_string(), count.to_string());
        }
        if let Some(names) = &self.accelerator_names {
            params.insert("accelerator_names".to_string(), names.join(", "));
        }
        params
    }
}

async fn query_accelerators() -> Vec<String> {
    let output = tokio::process::Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => parse_gpu_names(&String::from_utf8_lossy(&output.stdout)),
        Ok(output) => {
            tracing::debug!(status = %output.status, "nvidia-smi failed");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, "nvidia-smi not available");
            Vec::new()
        }
    }
}

fn parse_gpu_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Non-secret subset of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    /// Store endpoint
    pub store_endpoint: String,
    /// Store repository
    pub store_repository: String,
    /// Tracker URI, if configured
    pub tracker_uri: Option<String>,
    /// Default run tags
    pub default_tags: BTreeMap<String, String>,
}

impl From<&Config> for ConfigSnapshot {
    fn from(config: &Config) -> Self {
        Self {
            store_endpoint: config.store.endpoint.clone(),
            store_repository: config.store.repository.clone(),
            tracker_uri: config.tracker.tracking_uri.clone(),
            default_tags: config.experiment.default_tags.clone(),
        }
    }
}

/// Manifest of one batch publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataManifest {
    /// Host information
    pub experiment_info: ExperimentInfo,
    /// Local directory the results came from
    pub results_directory: String,
    /// Remote paths of the uploaded result files
    pub uploaded_files: Vec<String>,
    /// Number of uploaded result files
    pub file_count: usize,
    /// Configuration at publish time
    pub config_snapshot: ConfigSnapshot,
    /// Total size of the uploaded result files
    pub total_size_bytes: u64,
    /// Total size in MiB, rounded to two decimals
    pub total_size_mb: f64,
    /// Mean size of the uploaded result files (0 when none)
    pub average_size_bytes: u64,
}

impl MetadataManifest {
    /// Build a manifest from `(remote path, size)` pairs of uploaded results.
    #[must_use]
    pub fn new(
        experiment_info: ExperimentInfo,
        results_directory: impl Into<String>,
        uploaded: &[(String, u64)],
        config_snapshot: ConfigSnapshot,
    ) -> Self {
        let total_size_bytes: u64 = uploaded.iter().map(|(_, size)| size).sum();
        let file_count = uploaded.len();
        #[allow(clippy::cast_precision_loss)]
        let total_size_mb = (total_size_bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0;
        let average_size_bytes = total_size_bytes.checked_div(file_count as u64).unwrap_or(0);

        Self {
            experiment_info,
            results_directory: results_directory.into(),
            uploaded_files: uploaded.iter().map(|(path, _)| path.clone()).collect(),
            file_count,
            config_snapshot,
            total_size_bytes,
            total_size_mb,
            average_size_bytes,
        }
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
