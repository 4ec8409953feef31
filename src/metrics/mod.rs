//! Derived metrics for speculative-decoding benchmark results
//!
//! Turns the per-request decoding statistics of one result file into a flat,
//! namespaced metric set suitable for an experiment tracker.
//!
//! ## Usage
//!
//! ```rust
//! use bench_publish::metrics::{aggregate, BenchmarkRecord, Choice};
//!
//! let records = vec![BenchmarkRecord::with_choice(Choice::new(
//!     vec![2.0],
//!     vec![10.0],
//!     vec![40.0],
//!     vec![3.0, 0.0],
//! ))];
//!
//! let metrics = aggregate(&records, "mt_bench");
//! assert_eq!(metrics.get("mt_bench_avg_tokens_per_sec"), Some(20.0));
//! assert_eq!(metrics.get("mt_bench_acceptance_rate"), Some(0.5));
//! ```

mod record;

use std::collections::BTreeMap;

use serde::Serialize;

pub use record::{BenchmarkRecord, Choice, ParsedRecords};

/// Namespaced metric mapping for one benchmark.
///
/// Every key is `"{benchmark_name}_{metric}"` so that metric sets from
/// several result files can be logged into the same run without collisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedMetricSet {
    benchmark_name: String,
    values: BTreeMap<String, f64>,
}

impl DerivedMetricSet {
    fn new(benchmark_name: &str) -> Self {
        Self {
            benchmark_name: benchmark_name.to_string(),
            values: BTreeMap::new(),
        }
    }

    fn insert(&mut self, metric: &str, value: f64) {
        self.values
            .insert(format!("{}_{metric}", self.benchmark_name), value);
    }

    /// Benchmark name used as key prefix.
    #[must_use]
    pub fn benchmark_name(&self) -> &str {
        &self.benchmark_name
    }

    /// Look up a metric by its full, prefixed key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing could be derived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate metrics in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Consume into the underlying map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, f64> {
        self.values
    }
}

/// Decode the lines of a result file, skipping and counting malformed ones.
#[must_use]
pub fn parse_records(bytes: &[u8]) -> ParsedRecords {
    ParsedRecords::from_bytes(bytes)
}

/// Derive the benchmark name from a result file name.
///
/// `"mt-bench.jsonl"` becomes `"mt_bench"`.
#[must_use]
pub fn benchmark_name(file_name: &str) -> String {
    file_name.replace(".jsonl", "").replace('-', "_")
}

/// Fraction of accept lengths strictly greater than zero.
///
/// Always in `[0, 1]`; an empty slice yields 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn acceptance_rate(accept_lengths: &[f64]) -> f64 {
    if accept_lengths.is_empty() {
        return 0.0;
    }
    let accepted = accept_lengths.iter().filter(|&&al| al > 0.0).count();
    accepted as f64 / accept_lengths.len() as f64
}

/// Aggregate the records of one result file into a metric set.
///
/// Series are flattened across records (first choice only) before any
/// statistic is computed. A statistic is emitted only when its series is
/// non-empty; `tokens_per_sec` additionally requires `wall_time` and
/// `new_tokens` to have the same length.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(records: &[BenchmarkRecord], benchmark_name: &str) -> DerivedMetricSet {
    let mut metrics = DerivedMetricSet::new(benchmark_name);
    if records.is_empty() {
        return metrics;
    }

    metrics.insert("total_questions", records.len() as f64);

    let mut wall_times = Vec::new();
    let mut decoding_steps = Vec::new();
    let mut new_tokens = Vec::new();
    let mut accept_lengths = Vec::new();

    for choice in records.iter().filter_map(BenchmarkRecord::primary_choice) {
        wall_times.extend_from_slice(choice.wall_time());
        decoding_steps.extend_from_slice(choice.decoding_steps());
        new_tokens.extend_from_slice(choice.new_tokens());
        accept_lengths.extend_from_slice(choice.accept_lengths());
    }

    if !wall_times.is_empty() {
        metrics.insert("avg_wall_time", mean(&wall_times));
        metrics.insert("total_wall_time", wall_times.iter().sum());
        metrics.insert("max_wall_time", max(&wall_times));
        metrics.insert("min_wall_time", min(&wall_times));
    }

    if !decoding_steps.is_empty() {
        metrics.insert("avg_decoding_steps", mean(&decoding_steps));
        metrics.insert("total_decoding_steps", decoding_steps.iter().sum());
    }

    if !new_tokens.is_empty() {
        metrics.insert("avg_new_tokens", mean(&new_tokens));
        metrics.insert("total_new_tokens", new_tokens.iter().sum());

        if wall_times.len() == new_tokens.len() {
            let tokens_per_sec: Vec<f64> = new_tokens
                .iter()
                .zip(&wall_times)
                .map(|(&nt, &wt)| if wt > 0.0 { nt / wt } else { 0.0 })
                .collect();
            metrics.insert("avg_tokens_per_sec", mean(&tokens_per_sec));
            metrics.insert("max_tokens_per_sec", max(&tokens_per_sec));
        } else {
            tracing::debug!(
                benchmark = benchmark_name,
                wall_time_len = wall_times.len(),
                new_tokens_len = new_tokens.len(),
                "series lengths differ, omitting tokens_per_sec"
            );
        }
    }

    if !accept_lengths.is_empty() {
        metrics.insert("avg_accept_length", mean(&accept_lengths));
        metrics.insert("max_accept_length", max(&accept_lengths));
        metrics.insert("acceptance_rate", acceptance_rate(&accept_lengths));
    }

    metrics
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}
