//! Artifact Record - a file attached to a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file logged as run artifact.
///
/// `artifact_path` is the optional directory inside the run's artifact root;
/// the file keeps its local name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    run_id: String,
    artifact_path: Option<String>,
    file_name: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        artifact_path: Option<&str>,
        file_name: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            artifact_path: artifact_path
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            file_name: file_name.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Path of the artifact relative to the run's artifact root.
    #[must_use]
    pub fn remote_path(&self) -> String {
        match &self.artifact_path {
            Some(dir) => format!("{dir}/{}", self.file_name),
            None => self.file_name.clone(),
        }
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
