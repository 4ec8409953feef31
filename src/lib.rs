//! # bench-publish: Benchmark Result Publishing
//!
//! **Version**: 0.1.0
//!
//! Publishes speculative-decoding benchmark results (`*.jsonl`) to a
//! versioned object store (lakeFS) and mirrors derived metrics, host
//! information and a metadata manifest into an experiment tracker (MLflow).
//! A second entry point compares a model's throughput against a baseline
//! run and logs the speedup per task.
//!
//! ## Design Principles
//!
//! - **Commit or nothing**: uploads only become visible through a commit;
//!   no commit is attempted when nothing was uploaded
//! - **Failure isolation**: one failed upload never aborts the others
//! - **Best-effort tracking**: an unavailable tracker degrades to a
//!   store-only publish
//! - **Guaranteed closure**: a started tracker run is closed exactly once,
//!   including on interrupt
//!
//! ## Example Usage
//!
//! ```rust
//! use bench_publish::publish::{PublishRequest, PublishSettings, Publisher};
//! use bench_publish::store::MemoryStore;
//! use bench_publish::tracking::{ExperimentTracker, MemoryBackend};
//!
//! # async fn example() -> std::io::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let file = dir.path().join("mt-bench.jsonl");
//! std::fs::write(&file, "{\"choices\":[{\"accept_lengths\":[2,1]}]}\n")?;
//!
//! let store = MemoryStore::new("bench");
//! let tracker = ExperimentTracker::<MemoryBackend>::disabled();
//! let report = Publisher::new(&store, &tracker, PublishSettings::default())
//!     .publish(&PublishRequest::batch(dir.path(), vec![file]))
//!     .await;
//!
//! assert!(report.is_success());
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod check;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod publish;
pub mod speed;
pub mod store;
pub mod tracking;

pub use error::{Error, Result};
