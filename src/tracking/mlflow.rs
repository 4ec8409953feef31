//! MLflow REST backend
//!
//! Uses the `/api/2.0/mlflow` endpoints with HTTP basic auth. Artifacts are
//! uploaded through the tracking server's artifact proxy, so only runs whose
//! artifact root uses the `mlflow-artifacts:` scheme accept files.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{ExperimentTracker, RunStatus, TrackingBackend};
use crate::config::TrackerConfig;
use crate::{Error, Result};

const SERVICE: &str = "mlflow";

/// `runs/log-batch` accepts at most this many params per request.
const MAX_PARAMS_PER_BATCH: usize = 100;
/// `runs/log-batch` accepts at most this many metrics per request.
const MAX_METRICS_PER_BATCH: usize = 1000;

const PROXY_SCHEME: &str = "mlflow-artifacts:";

/// MLflow tracking server client.
#[derive(Clone)]
pub struct MlflowBackend {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct ExperimentEnvelope {
    experiment: ExperimentInfo,
}

#[derive(Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreatedExperiment {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunEnvelope {
    run: Run,
}

#[derive(Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    artifact_uri: String,
}

impl MlflowBackend {
    /// Build a client for `tracking_uri`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be created.
    pub fn new(tracking_uri: &str, username: &str, password: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("bench-publish/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: tracking_uri.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn api(&self, method: &str) -> String {
        format!("{}/api/2.0/mlflow/{method}", self.base_url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authed(request)
            .send()
            .await
            .map_err(|e| Error::from_transport(SERVICE, &e))
    }

    async fn post_json(&self, method: &str, body: &serde_json::Value) -> Result<Response> {
        let response = self.send(self.client.post(self.api(method)).json(body)).await?;
        expect_success(response).await
    }

    /// ID of the experiment called `name`, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `Auth`, `Connectivity` or `Tracker` on any other failure.
    pub async fn find_experiment(&self, name: &str) -> Result<Option<String>> {
        let request = self
            .client
            .get(self.api("experiments/get-by-name"))
            .query(&[("experiment_name", name)]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: ExperimentEnvelope = expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Tracker(format!("invalid experiment response: {e}")))?;
        Ok(Some(envelope.experiment.experiment_id))
    }

    async fn artifact_uri(&self, run_id: &str) -> Result<String> {
        let request = self
            .client
            .get(self.api("runs/get"))
            .query(&[("run_id", run_id)]);
        let response = expect_success(self.send(request).await?).await?;
        let envelope: RunEnvelope = response
            .json()
            .await
            .map_err(|e| Error::Tracker(format!("invalid run response: {e}")))?;
        Ok(envelope.run.info.artifact_uri)
    }
}

impl std::fmt::Debug for MlflowBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlflowBackend")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

async fn expect_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(Error::Auth {
            service: SERVICE,
            message: format!("HTTP {status}: {body}"),
        });
    }
    Err(Error::Tracker(format!("HTTP {status}: {body}")))
}

/// Proxy path of an artifact under a `mlflow-artifacts:` root.
fn proxied_artifact_path(artifact_uri: &str, artifact_path: Option<&str>, file_name: &str) -> Option<String> {
    let root = artifact_uri.strip_prefix(PROXY_SCHEME)?;
    // `mlflow-artifacts://host/path` carries an authority, `mlflow-artifacts:/path` does not.
    let root = match root.strip_prefix("//") {
        Some(rest) => rest.split_once('/').map_or("", |(_, path)| path),
        None => root,
    };

    let mut segments: Vec<&str> = root.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(dir) = artifact_path {
        segments.extend(dir.split('/').filter(|s| !s.is_empty()));
    }
    segments.push(file_name);
    Some(segments.join("/"))
}

impl TrackingBackend for MlflowBackend {
    async fn ensure_experiment(&self, name: &str) -> Result<String> {
        if let Some(id) = self.find_experiment(name).await? {
            return Ok(id);
        }
        let created: CreatedExperiment = self
            .post_json("experiments/create", &json!({ "name": name }))
            .await?
            .json()
            .await
            .map_err(|e| Error::Tracker(format!("invalid experiment response: {e}")))?;
        tracing::info!(experiment = name, id = %created.experiment_id, "created experiment");
        Ok(created.experiment_id)
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        let tags: Vec<_> = tags
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        let body = json!({
            "experiment_id": experiment_id,
            "run_name": run_name,
            "start_time": Utc::now().timestamp_millis(),
            "tags": tags,
        });
        let envelope: RunEnvelope = self
            .post_json("runs/create", &body)
            .await?
            .json()
            .await
            .map_err(|e| Error::Tracker(format!("invalid run response: {e}")))?;
        Ok(envelope.run.info.run_id)
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()> {
        let params: Vec<_> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        for chunk in params.chunks(MAX_PARAMS_PER_BATCH) {
            self.post_json("runs/log-batch", &json!({ "run_id": run_id, "params": chunk }))
                .await?;
        }
        Ok(())
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> Result<usize> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<_> = metrics
            .iter()
            .filter(|(key, value)| {
                let finite = value.is_finite();
                if !finite {
                    tracing::warn!(metric = %key, "dropping non-finite metric value");
                }
                finite
            })
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "timestamp": timestamp, "step": step })
            })
            .collect();
        for chunk in metrics.chunks(MAX_METRICS_PER_BATCH) {
            self.post_json("runs/log-batch", &json!({ "run_id": run_id, "metrics": chunk }))
                .await?;
        }
        Ok(metrics.len())
    }

    async fn log_artifact(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Tracker(format!("{} has no file name", local_path.display())))?;
        let content = tokio::fs::read(local_path).await?;

        let artifact_uri = self.artifact_uri(run_id).await?;
        let remote = proxied_artifact_path(&artifact_uri, artifact_path, &file_name)
            .ok_or_else(|| {
                Error::Tracker(format!(
                    "artifact root '{artifact_uri}' is not served by the tracking server"
                ))
            })?;

        let url = format!("{}/api/2.0/mlflow-artifacts/artifacts/{remote}", self.base_url);
        let response = self.send(self.client.put(url).body(content)).await?;
        expect_success(response).await?;
        tracing::debug!(artifact = %remote, "uploaded artifact");
        Ok(())
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let body = json!({
            "run_id": run_id,
            "status": status.as_str(),
            "end_time": Utc::now().timestamp_millis(),
        });
        self.post_json("runs/update", &body).await?;
        Ok(())
    }
}

impl ExperimentTracker<MlflowBackend> {
    /// Connect to the tracker described by `config`.
    ///
    /// Missing URI or credentials, and any failure resolving the experiment,
    /// produce a disabled tracker.
    pub async fn from_config(
        config: &TrackerConfig,
        default_tags: BTreeMap<String, String>,
    ) -> Self {
        let Some(uri) = config.tracking_uri.as_deref().filter(|u| !u.trim().is_empty()) else {
            tracing::warn!("no tracking_uri configured, experiment tracking disabled");
            return Self::disabled();
        };
        let (Some(username), Some(password)) =
            (config.username.as_deref(), config.password.as_deref())
        else {
            tracing::warn!(uri, "tracker credentials missing, experiment tracking disabled");
            return Self::disabled();
        };

        match MlflowBackend::new(uri, username, password) {
            Ok(backend) => Self::connect(backend, &config.experiment_name, default_tags).await,
            Err(e) => {
                tracing::warn!(error = %e, "experiment tracking disabled");
                Self::disabled()
            }
        }
    }
}
