//! Versioned object store (branch, put, commit)
//!
//! Uploaded objects only become durable, queryable state once a commit on
//! their branch succeeds.
//!
//! # Example
//!
//! ```rust
//! use bench_publish::store::{MemoryStore, VersionedStore};
//!
//! # async fn example() -> bench_publish::Result<()> {
//! let store = MemoryStore::new("benchmarks");
//! store.check_connection().await?;
//!
//! store.ensure_branch("experiment_20250101", "main").await?;
//! store
//!     .put_object("experiment_20250101", "results/a.jsonl", b"{}".to_vec())
//!     .await?;
//! let commit = store.commit("experiment_20250101", "Add results").await?;
//! assert_eq!(commit.branch, "experiment_20250101");
//! # Ok(())
//! # }
//! ```

mod lakefs;
mod memory;

pub use lakefs::LakeFsStore;
pub use memory::MemoryStore;

use crate::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// A named, mutable line of uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name
    pub name: String,
    /// Ref the branch was created from
    pub source: String,
    /// Owning repository
    pub repository: String,
}

/// An immutable snapshot of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier assigned by the store
    pub id: String,
    /// Branch the commit was made on
    pub branch: String,
    /// Commit message
    pub message: String,
}

/// Branchable, commit-based object repository.
///
/// Every operation reports failure through its `Result`; callers decide
/// whether a failure is fatal. A store instance is bound to one repository.
pub trait VersionedStore: Send + Sync {
    /// Repository this store writes to.
    fn repository(&self) -> &str;

    /// Cheap reachability and authentication probe.
    fn check_connection(&self) -> impl Future<Output = Result<()>> + Send;

    /// Create `name` from `source`.
    ///
    /// Idempotent: a branch that already exists is returned as success.
    fn ensure_branch(
        &self,
        name: &str,
        source: &str,
    ) -> impl Future<Output = Result<Branch>> + Send;

    /// Stage one object on `branch`.
    ///
    /// A failure affects only this object.
    fn put_object(
        &self,
        branch: &str,
        path: &str,
        content: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Commit everything staged on `branch`.
    fn commit(&self, branch: &str, message: &str) -> impl Future<Output = Result<Commit>> + Send;

    /// Human-facing location for browsing `branch`, when the store has one.
    fn browse_url(&self, _branch: &str) -> Option<String> {
        None
    }
}
