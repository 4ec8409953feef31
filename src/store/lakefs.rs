//! lakeFS REST client
//!
//! Talks to the `/api/v1` surface of a lakeFS server with HTTP basic auth.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;

use super::{Branch, Commit, VersionedStore};
use crate::config::StoreConfig;
use crate::{Error, Result};

const SERVICE: &str = "lakefs";

/// lakeFS-backed versioned store bound to one repository.
#[derive(Clone)]
pub struct LakeFsStore {
    client: reqwest::Client,
    base_url: String,
    repository: String,
    access_key: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    id: String,
}

#[derive(Deserialize)]
struct RepositoryList {
    #[serde(default)]
    results: Vec<RepositoryEntry>,
}

#[derive(Deserialize)]
struct RepositoryEntry {
    id: String,
}

impl LakeFsStore {
    /// Build a client from configuration.
    ///
    /// The endpoint may be given with or without the `/api/v1` suffix.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the endpoint, repository or either
    /// credential is missing. No request is made.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let (Some(access_key), Some(secret_key)) = (
            config.access_key.as_deref().filter(|k| !k.is_empty()),
            config.secret_key.as_deref().filter(|k| !k.is_empty()),
        ) else {
            return Err(Error::Config(
                "store access_key and secret_key are required".to_string(),
            ));
        };
        if config.endpoint.trim().is_empty() || config.repository.trim().is_empty() {
            return Err(Error::Config(
                "store endpoint and repository are required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("bench-publish/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        let base_url = config
            .endpoint
            .trim_end_matches('/')
            .trim_end_matches("/api/v1")
            .to_string();

        Ok(Self {
            client,
            base_url,
            repository: config.repository.clone(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn repo_api(&self, path: &str) -> String {
        self.api(&format!("/repositories/{}{path}", self.repository))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }

    /// IDs of every repository visible to the credentials.
    ///
    /// # Errors
    ///
    /// Returns `Auth` on rejected credentials and `Connectivity` when the
    /// server cannot be reached.
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let response = self
            .get(&self.api("/repositories"))
            .send()
            .await
            .map_err(|e| Error::from_transport(SERVICE, &e))?;
        let response = expect_success(response).await?;
        let list: RepositoryList = response
            .json()
            .await
            .map_err(|e| Error::Store(format!("invalid repository list: {e}")))?;
        Ok(list.results.into_iter().map(|r| r.id).collect())
    }

    /// Whether the configured repository exists.
    ///
    /// # Errors
    ///
    /// Same as [`Self::list_repositories`], except a 404 is `Ok(false)`.
    pub async fn repository_exists(&self) -> Result<bool> {
        let response = self
            .get(&self.repo_api(""))
            .send()
            .await
            .map_err(|e| Error::from_transport(SERVICE, &e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for LakeFsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LakeFsStore")
            .field("base_url", &self.base_url)
            .field("repository", &self.repository)
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
    Err(Error::Store(format!("HTTP {status}: {body}")))
}

impl VersionedStore for LakeFsStore {
    fn repository(&self) -> &str {
        &self.repository
    }

    async fn check_connection(&self) -> Result<()> {
        let repos = self.list_repositories().await?;
        tracing::debug!(repositories = repos.len(), "lakeFS reachable");
        Ok(())
    }

    async fn ensure_branch(&self, name: &str, source: &str) -> Result<Branch> {
        let body = serde_json::json!({ "name": name, "source": source });
        let response = self
            .post(&self.repo_api("/branches"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_transport(SERVICE, &e))?;

        if response.status() == StatusCode::CONFLICT {
            tracing::info!(branch = name, "branch already exists");
        } else {
            expect_success(response).await?;
            tracing::info!(branch = name, source, "created branch");
        }

        Ok(Branch {
            name: name.to_string(),
            source: source.to_string(),
            repository: self.repository.clone(),
        })
    }

    async fn put_object(&self, branch: &str, path: &str, content: Vec<u8>) -> Result<()> {
        let upload_error = |message: String| Error::Upload {
            path: path.to_string(),
            message,
        };
        let size = content.len();

        let response = self
            .post(&self.repo_api(&format!("/branches/{branch}/objects")))
            .query(&[("path", path)])
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        expect_success(response)
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        tracing::info!(path, size, "uploaded object");
        Ok(())
    }

    async fn commit(&self, branch: &str, message: &str) -> Result<Commit> {
        let commit_error = |detail: String| Error::Commit {
            branch: branch.to_string(),
            message: detail,
        };
        let body = serde_json::json!({ "message": message });

        let response = self
            .post(&self.repo_api(&format!("/branches/{branch}/commits")))
            .json(&body)
            .send()
            .await
            .map_err(|e| commit_error(e.to_string()))?;
        let response = expect_success(response)
            .await
            .map_err(|e| commit_error(e.to_string()))?;
        let created: CommitResponse = response
            .json()
            .await
            .map_err(|e| commit_error(format!("invalid commit response: {e}")))?;

        tracing::info!(commit = %created.id, branch, "committed changes");
        Ok(Commit {
            id: created.id,
            branch: branch.to_string(),
            message: message.to_string(),
        })
    }

    fn browse_url(&self, branch: &str) -> Option<String> {
        Some(format!(
            "{}/repositories/{}/objects?ref={branch}",
            self.base_url, self.repository
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> StoreConfig {
        StoreConfig {
            endpoint: endpoint.to_string(),
            repository: "bench".to_string(),
            access_key: Some("AKIA".to_string()),
            secret_key: Some("secret".to_string()),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let mut cfg = config("http://localhost:8000");
        cfg.secret_key = None;
        let err = LakeFsStore::new(&cfg).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_endpoint_normalization() {
        let store = LakeFsStore::new(&config("http://lakefs:8000/api/v1/")).unwrap();
        assert_eq!(
            store.browse_url("exp_1").unwrap(),
            "http://lakefs:8000/repositories/bench/objects?ref=exp_1"
        );
    }

    #[tokio::test]
    async fn test_check_connection_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repositories"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": [{"id": "bench"}]})),
            )
            .mount(&server)
            .await;

        let store = LakeFsStore::new(&config(&server.uri())).unwrap();
        assert!(store.check_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_check_connection_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repositories"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = LakeFsStore::new(&config(&server.uri())).unwrap();
        let err = store.check_connection().await.unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connectivity_error() {
        let store = LakeFsStore::new(&config("http://127.0.0.1:1")).unwrap();
        let err = store.check_connection().await.unwrap_err();
        assert!(matches!(err, Error::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_ensure_branch_conflict_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repositories/bench/branches"))
            .and(body_json(serde_json::json!({"name": "exp_1", "source": "main"})))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let store = LakeFsStore::new(&config(&server.uri())).unwrap();
        let first = store.ensure_branch("exp_1", "main").await.unwrap();
        let second = store.ensure_branch("exp_1", "main").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_put_object_failure_is_upload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repositories/bench/branches/exp_1/objects"))
            .and(query_param("path", "results/1/a.jsonl"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = LakeFsStore::new(&config(&server.uri())).unwrap();
        let err = store
            .put_object("exp_1", "results/1/a.jsonl", b"{}".to_vec())
            .await
            .unwrap_err();
        match err {
            Error::Upload { path, message } => {
                assert_eq!(path, "results/1/a.jsonl");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_commit_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repositories/bench/branches/exp_1/commits"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "c0ffee"})),
            )
            .mount(&server)
            .await;

        let store = LakeFsStore::new(&config(&server.uri())).unwrap();
        let commit = store.commit("exp_1", "Benchmark results").await.unwrap();
        assert_eq!(commit.id, "c0ffee");
        assert_eq!(commit.message, "Benchmark results");
    }

    #[tokio::test]
    async fn test_repository_exists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repositories/bench"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = LakeFsStore::new(&config(&server.uri())).unwrap();
        assert!(!store.repository_exists().await.unwrap());
    }
}
