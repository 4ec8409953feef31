//! Error types for bench-publish
//!
//! Fatal classes (`Config`, `Auth`, `Connectivity`, `Commit`) end a publish.
//! Isolated classes (`Upload`, `Parse`) are collected and reported at the end.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// bench-publish error types
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration missing, unreadable or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials rejected by a remote service
    #[error("Authentication failed for {service}: {message}")]
    Auth {
        /// Service that rejected the credentials (`lakefs`, `mlflow`)
        service: &'static str,
        /// Detail returned by the service
        message: String,
    },

    /// Remote service unreachable
    #[error("Cannot reach {service}: {message}")]
    Connectivity {
        /// Service that could not be reached
        service: &'static str,
        /// Transport error detail
        message: String,
    },

    /// Single object upload failed (isolated, never aborts a publish)
    #[error("Failed to upload '{path}': {message}")]
    Upload {
        /// Remote path of the object
        path: String,
        /// Failure detail
        message: String,
    },

    /// Commit creation failed
    #[error("Failed to commit on branch '{branch}': {message}")]
    Commit {
        /// Branch the commit targeted
        branch: String,
        /// Failure detail
        message: String,
    },

    /// Any other versioned-store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Experiment tracker failure
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Malformed result line
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Parser detail
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error ends a publish before or instead of a commit.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Auth { .. } | Self::Connectivity { .. } | Self::Commit { .. }
        )
    }

    pub(crate) fn from_transport(service: &'static str, err: &reqwest::Error) -> Self {
        Self::Connectivity {
            service,
            message: err.to_string(),
        }
    }
}
