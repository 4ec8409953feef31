//! Typed configuration loaded from YAML
//!
//! Every recognized option has a default, so a minimal file only needs the
//! store endpoint, repository and credentials. The section names `lakefs` and
//! `mlflow` are accepted as aliases of `store` and `tracker`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default results directory of the evaluation harness.
pub const DEFAULT_RESULTS_DIR: &str = "data/spec_bench/model_answer";

/// Default tracker experiment name.
pub const DEFAULT_EXPERIMENT_NAME: &str = "spec-bench-evaluation";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Versioned object store
    #[serde(alias = "lakefs")]
    pub store: StoreConfig,
    /// Experiment tracker
    #[serde(alias = "mlflow")]
    pub tracker: TrackerConfig,
    /// Experiment defaults shared by runs
    pub experiment: ExperimentConfig,
    /// Benchmark output location
    pub benchmark: BenchmarkConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Versioned store connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Server URL, with or without `/api/v1`
    pub endpoint: String,
    /// Repository receiving the results
    pub repository: String,
    /// Prefix of every branch created by a publish
    pub branch_prefix: String,
    /// Ref new branches are created from
    pub source_branch: String,
    /// Access key ID
    pub access_key: Option<String>,
    /// Secret access key
    pub secret_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            repository: String::new(),
            branch_prefix: "experiment".to_string(),
            source_branch: "main".to_string(),
            access_key: None,
            secret_key: None,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("repository", &self.repository)
            .field("branch_prefix", &self.branch_prefix)
            .field("source_branch", &self.source_branch)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Experiment tracker connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Tracking server URL; tracking is disabled when unset
    pub tracking_uri: Option<String>,
    /// Basic-auth user
    pub username: Option<String>,
    /// Basic-auth password
    pub password: Option<String>,
    /// Experiment receiving the runs
    pub experiment_name: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking_uri: None,
            username: None,
            password: None,
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
        }
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("tracking_uri", &self.tracking_uri)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("experiment_name", &self.experiment_name)
            .finish()
    }
}

/// Defaults applied to every tracked run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Tags merged into every run (run tags win on conflict)
    pub default_tags: BTreeMap<String, String>,
}

/// Benchmark output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Directory holding `*.jsonl` result files
    pub results_dir: PathBuf,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
        }
    }
}

/// Line layout of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Timestamp, level, target, span context and fields
    #[default]
    Full,
    /// Single short line per event
    Compact,
}

/// When the log file is rolled over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// One file, appended to
    #[default]
    Never,
    /// A new file every hour
    Hourly,
    /// A new file every day
    Daily,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `debug`, `bench_publish=trace`, ...)
    pub level: String,
    /// Line layout, shared by stderr and the file
    pub format: LogFormat,
    /// Optional log file, written in addition to stderr
    pub file: Option<PathBuf>,
    /// Rollover period of the log file
    pub rotation: LogRotation,
    /// Rolled-over files kept next to the current one
    pub backup_count: usize,
    /// Colored stderr output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
            file: None,
            rotation: LogRotation::Never,
            backup_count: 5,
            ansi: true,
        }
    }
}

impl Config {
    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the YAML is malformed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("invalid YAML: {e}")))
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Check the options a publish cannot run without.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing option.
    pub fn validate(&self) -> Result<()> {
        if self.store.endpoint.trim().is_empty() {
            return Err(Error::Config("store.endpoint is required".to_string()));
        }
        if self.store.repository.trim().is_empty() {
            return Err(Error::Config("store.repository is required".to_string()));
        }
        if self.store.branch_prefix.trim().is_empty() {
            return Err(Error::Config("store.branch_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}
