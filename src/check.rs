//! Connectivity check of the configured services.

use std::fmt;

use crate::config::Config;
use crate::store::LakeFsStore;
use crate::tracking::MlflowBackend;

/// Result of probing one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Reachable and accepting the credentials
    Ok,
    /// Not configured
    Skipped(String),
    /// Probe failed
    Failed(String),
}

impl ServiceStatus {
    const fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Skipped(_) => "SKIPPED",
            Self::Failed(_) => "FAILED",
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::Ok => "",
            Self::Skipped(detail) | Self::Failed(detail) => detail,
        }
    }
}

/// Outcome of [`run_check`].
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Store endpoint probe
    pub store: ServiceStatus,
    /// Whether the configured repository exists (when the store answered)
    pub repository_exists: Option<bool>,
    /// Tracker probe
    pub tracker: ServiceStatus,
    /// Whether the configured experiment exists (when the tracker answered)
    pub experiment_exists: Option<bool>,
}

impl CheckReport {
    /// The store is usable: reachable and the repository exists.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.store == ServiceStatus::Ok && self.repository_exists == Some(true)
    }

    /// Process exit code.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_ok())
    }
}

fn yes_no(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10} {:<8} {:<8} DETAIL", "SERVICE", "STATUS", "TARGET")?;
        writeln!(
            f,
            "{:<10} {:<8} {:<8} {}",
            "store",
            self.store.label(),
            yes_no(self.repository_exists),
            self.store.detail()
        )?;
        writeln!(
            f,
            "{:<10} {:<8} {:<8} {}",
            "tracker",
            self.tracker.label(),
            yes_no(self.experiment_exists),
            self.tracker.detail()
        )
    }
}

/// Probe the store (repository presence) and the tracker (experiment
/// presence). Never fails; problems are reported per service.
pub async fn run_check(config: &Config) -> CheckReport {
    let (store, repository_exists) = check_store(config).await;
    let (tracker, experiment_exists) = check_tracker(config).await;
    CheckReport {
        store,
        repository_exists,
        tracker,
        experiment_exists,
    }
}

async fn check_store(config: &Config) -> (ServiceStatus, Option<bool>) {
    let store = match LakeFsStore::new(&config.store) {
        Ok(store) => store,
        Err(e) => return (ServiceStatus::Failed(e.to_string()), None),
    };
    match store.list_repositories().await {
        Ok(repos) => {
            tracing::info!(count = repos.len(), "store reachable");
            let exists = repos.iter().any(|r| r == &config.store.repository);
            if exists {
                return (ServiceStatus::Ok, Some(true));
            }
            // Listings are paginated; ask for the repository directly.
            match store.repository_exists().await {
                Ok(exists) => (ServiceStatus::Ok, Some(exists)),
                Err(e) => (ServiceStatus::Failed(e.to_string()), None),
            }
        }
        Err(e) => (ServiceStatus::Failed(e.to_string()), None),
    }
}

async fn check_tracker(config: &Config) -> (ServiceStatus, Option<bool>) {
    let tracker = &config.tracker;
    let Some(uri) = tracker.tracking_uri.as_deref().filter(|u| !u.trim().is_empty()) else {
        return (ServiceStatus::Skipped("tracking_uri not set".to_string()), None);
    };
    let (Some(username), Some(password)) = (tracker.username.as_deref(), tracker.password.as_deref())
    else {
        return (ServiceStatus::Skipped("credentials not set".to_string()), None);
    };

    let backend = match MlflowBackend::new(uri, username, password) {
        Ok(backend) => backend,
        Err(e) => return (ServiceStatus::Failed(e.to_string()), None),
    };
    match backend.find_experiment(&tracker.experiment_name).await {
        Ok(found) => (ServiceStatus::Ok, Some(found.is_some())),
        Err(e) => (ServiceStatus::Failed(e.to_string()), None),
    }
}
