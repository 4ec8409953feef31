//! In-memory versioned store using `DashMap`.
//!
//! Data is lost on process restart. Faults can be injected per object path,
//! for commits and for the connectivity probe, which makes this backend the
//! workhorse of the publish tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::{DashMap, DashSet};

use super::{Branch, Commit, VersionedStore};
use crate::{Error, Result};

/// In-memory branch/commit store.
///
/// Objects are keyed by `(branch, path)`. A commit snapshots the paths staged
/// on its branch since the previous commit.
pub struct MemoryStore {
    repository: String,
    branches: DashMap<String, Branch>,
    objects: DashMap<(String, String), Vec<u8>>,
    staged: DashMap<String, BTreeSet<String>>,
    commits: Mutex<Vec<(Commit, Vec<String>)>>,
    failing_paths: DashSet<String>,
    fail_commit: AtomicBool,
    unreachable: AtomicBool,
    put_calls: AtomicUsize,
    upload_delay: Option<Duration>,
}

impl MemoryStore {
    /// Create an empty store for `repository` with a `main` branch.
    #[must_use]
    pub fn new(repository: impl Into<String>) -> Self {
        let repository = repository.into();
        let branches = DashMap::new();
        branches.insert(
            "main".to_string(),
            Branch {
                name: "main".to_string(),
                source: "main".to_string(),
                repository: repository.clone(),
            },
        );
        Self {
            repository,
            branches,
            objects: DashMap::new(),
            staged: DashMap::new(),
            commits: Mutex::new(Vec::new()),
            failing_paths: DashSet::new(),
            fail_commit: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            put_calls: AtomicUsize::new(0),
            upload_delay: None,
        }
    }

    /// Fail every upload whose remote path ends with `suffix`.
    #[must_use]
    pub fn with_failing_upload(self, suffix: impl Into<String>) -> Self {
        self.failing_paths.insert(suffix.into());
        self
    }

    /// Fail every commit.
    #[must_use]
    pub fn with_failing_commit(self) -> Self {
        self.fail_commit.store(true, Ordering::SeqCst);
        self
    }

    /// Hold every upload for `delay` before it completes.
    #[must_use]
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Fail the connectivity probe.
    #[must_use]
    pub fn unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    /// Whether `name` exists.
    #[must_use]
    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    /// Content of an object, committed or not.
    #[must_use]
    pub fn object(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .get(&(branch.to_string(), path.to_string()))
            .map(|v| v.value().clone())
    }

    /// Number of `put_object` calls, successful or not.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// All commits in creation order.
    #[must_use]
    pub fn commits(&self) -> Vec<Commit> {
        self.commits
            .lock()
            .map(|c| c.iter().map(|(commit, _)| commit.clone()).collect())
            .unwrap_or_default()
    }

    /// Paths included in the commit with `id`.
    #[must_use]
    pub fn committed_paths(&self, id: &str) -> Vec<String> {
        self.commits
            .lock()
            .ok()
            .and_then(|c| {
                c.iter()
                    .find(|(commit, _)| commit.id == id)
                    .map(|(_, paths)| paths.clone())
            })
            .unwrap_or_default()
    }

    fn probe(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Connectivity {
                service: "memory",
                message: "store marked unreachable".to_string(),
            });
        }
        Ok(())
    }
}

impl VersionedStore for MemoryStore {
    fn repository(&self) -> &str {
        &self.repository
    }

    async fn check_connection(&self) -> Result<()> {
        self.probe()
    }

    async fn ensure_branch(&self, name: &str, source: &str) -> Result<Branch> {
        self.probe()?;
        if !self.branches.contains_key(source) {
            return Err(Error::Store(format!("source ref '{source}' not found")));
        }
        let branch = self
            .branches
            .entry(name.to_string())
            .or_insert_with(|| Branch {
                name: name.to_string(),
                source: source.to_string(),
                repository: self.repository.clone(),
            })
            .value()
            .clone();
        Ok(branch)
    }

    async fn put_object(&self, branch: &str, path: &str, content: Vec<u8>) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_paths.iter().any(|s| path.ends_with(s.key().as_str())) {
            return Err(Error::Upload {
                path: path.to_string(),
                message: "injected failure".to_string(),
            });
        }
        if !self.branches.contains_key(branch) {
            return Err(Error::Upload {
                path: path.to_string(),
                message: format!("branch '{branch}' not found"),
            });
        }
        self.objects
            .insert((branch.to_string(), path.to_string()), content);
        self.staged
            .entry(branch.to_string())
            .or_default()
            .insert(path.to_string());
        Ok(())
    }

    async fn commit(&self, branch: &str, message: &str) -> Result<Commit> {
        let commit_error = |message: &str| Error::Commit {
            branch: branch.to_string(),
            message: message.to_string(),
        };
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(commit_error("injected failure"));
        }
        let paths: Vec<String> = self
            .staged
            .remove(branch)
            .map(|(_, paths)| paths.into_iter().collect())
            .unwrap_or_default();
        if paths.is_empty() {
            return Err(commit_error("no changes"));
        }

        let mut commits = self
            .commits
            .lock()
            .map_err(|_| commit_error("commit log poisoned"))?;
        let commit = Commit {
            id: format!("{:016x}", commits.len() + 1),
            branch: branch.to_string(),
            message: message.to_string(),
        };
        commits.push((commit.clone(), paths));
        Ok(commit)
    }
}
