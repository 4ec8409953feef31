//! Speedup analysis against a baseline run
//!
//! Compares the decoding throughput of a speculative-decoding result file
//! with the result file of a vanilla autoregressive run of the same
//! questions, task by task, and logs the comparison to the experiment
//! tracker as a `speed_analysis_{model}` run.
//!
//! Throughput of one record is its generated tokens over its wall time, both
//! summed across turns. A task's throughput is the mean over its records.
//!
//! ## Usage
//!
//! ```rust
//! use bench_publish::metrics::{BenchmarkRecord, Choice};
//! use bench_publish::speed::TaskSpeed;
//!
//! let model = vec![BenchmarkRecord::with_choice(Choice::new(
//!     vec![1.0], vec![], vec![60.0], vec![2.0, 0.0],
//! ))
//! .with_category("qa")];
//! let baseline = vec![BenchmarkRecord::with_choice(Choice::new(
//!     vec![2.0], vec![], vec![60.0], vec![],
//! ))
//! .with_category("qa")];
//!
//! let qa = TaskSpeed::compare(&model, &baseline, "qa").unwrap();
//! assert_eq!(qa.speedup_ratio, 2.0);
//! assert_eq!(qa.metrics()["qa_acceptance_rate"], 0.5);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::metrics::{acceptance_rate, max, mean, parse_records, BenchmarkRecord};
use crate::tracking::{ExperimentTracker, MlflowBackend, RunStatus, TrackingBackend};
use crate::Result;

/// Tasks compared, in logging order. `overall` covers every record.
pub const SPEED_TASKS: [&str; 7] = [
    "mt_bench",
    "translation",
    "summarization",
    "qa",
    "math_reasoning",
    "rag",
    "overall",
];

/// Question categories grouped under the `mt_bench` task.
pub const MT_BENCH_CATEGORIES: [&str; 8] = [
    "writing",
    "roleplay",
    "reasoning",
    "math",
    "coding",
    "extraction",
    "stem",
    "humanities",
];

fn in_task(record: &BenchmarkRecord, task: &str) -> bool {
    match task {
        "overall" => true,
        "mt_bench" => record
            .category()
            .is_some_and(|category| MT_BENCH_CATEGORIES.contains(&category)),
        _ => record.category() == Some(task),
    }
}

/// Per-record throughput (tokens/s) of the records belonging to `task`.
///
/// Records without a choice or without elapsed time are left out.
#[must_use]
pub fn task_throughputs(records: &[BenchmarkRecord], task: &str) -> Vec<f64> {
    records
        .iter()
        .filter(|record| in_task(record, task))
        .filter_map(BenchmarkRecord::primary_choice)
        .filter_map(|choice| {
            let seconds: f64 = choice.wall_time().iter().sum();
            let tokens: f64 = choice.new_tokens().iter().sum();
            (seconds > 0.0).then(|| tokens / seconds)
        })
        .collect()
}

/// Throughput comparison of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSpeed {
    /// Task name
    pub task: String,
    /// Mean throughput of the model
    pub tokens_per_second: f64,
    /// Mean throughput of the baseline
    pub tokens_per_second_baseline: f64,
    /// Model over baseline throughput
    pub speedup_ratio: f64,
    /// Mean accepted draft length, when the model reports any
    pub mean_accept_length: Option<f64>,
    /// Longest accepted draft
    pub max_accept_length: Option<f64>,
    /// Fraction of steps with at least one accepted token
    pub acceptance_rate: Option<f64>,
}

impl TaskSpeed {
    /// Compare `model` against `baseline` on `task`.
    ///
    /// `None` when either side has no timed record for the task or the
    /// baseline throughput is zero.
    #[must_use]
    pub fn compare(model: &[BenchmarkRecord], baseline: &[BenchmarkRecord], task: &str) -> Option<Self> {
        let speeds = task_throughputs(model, task);
        let baseline_speeds = task_throughputs(baseline, task);
        if speeds.is_empty() || baseline_speeds.is_empty() {
            return None;
        }
        let tokens_per_second = mean(&speeds);
        let tokens_per_second_baseline = mean(&baseline_speeds);
        if tokens_per_second_baseline <= 0.0 {
            return None;
        }

        let accept_lengths: Vec<f64> = model
            .iter()
            .filter(|record| in_task(record, task))
            .filter_map(BenchmarkRecord::primary_choice)
            .flat_map(|choice| choice.accept_lengths().iter().copied())
            .collect();
        let accepted = !accept_lengths.is_empty();

        Some(Self {
            task: task.to_string(),
            tokens_per_second,
            tokens_per_second_baseline,
            speedup_ratio: tokens_per_second / tokens_per_second_baseline,
            mean_accept_length: accepted.then(|| mean(&accept_lengths)),
            max_accept_length: accepted.then(|| max(&accept_lengths)),
            acceptance_rate: accepted.then(|| acceptance_rate(&accept_lengths)),
        })
    }

    /// Metrics keyed `{task}_{metric}`.
    #[must_use]
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let mut put = |metric: &str, value: f64| {
            metrics.insert(format!("{}_{metric}", self.task), value);
        };
        put("tokens_per_second", self.tokens_per_second);
        put("tokens_per_second_baseline", self.tokens_per_second_baseline);
        put("speedup_ratio", self.speedup_ratio);
        if let Some(value) = self.mean_accept_length {
            put("mean_accept_length", value);
        }
        if let Some(value) = self.max_accept_length {
            put("max_accept_length", value);
        }
        if let Some(value) = self.acceptance_rate {
            put("acceptance_rate", value);
        }
        metrics
    }
}

/// Files to compare.
#[derive(Debug, Clone)]
pub struct SpeedRequest {
    /// Model the results belong to
    pub model_name: String,
    /// Result file of the speculative-decoding run
    pub model_file: PathBuf,
    /// Result file of the baseline run
    pub baseline_file: PathBuf,
    /// Tokenizer the results were produced with, recorded as a param
    pub tokenizer_path: Option<String>,
}

impl SpeedRequest {
    fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::from([
            ("model_name".to_string(), self.model_name.clone()),
            ("model_file".to_string(), file_name(&self.model_file)),
            ("baseline_file".to_string(), file_name(&self.baseline_file)),
        ]);
        if let Some(tokenizer) = &self.tokenizer_path {
            params.insert("tokenizer_path".to_string(), tokenizer.clone());
        }
        params
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Outcome of a speed analysis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpeedReport {
    /// Model analyzed
    pub model_name: String,
    /// Tasks compared, in [`SPEED_TASKS`] order
    pub tasks: Vec<TaskSpeed>,
    /// Tasks without data on one side
    pub skipped_tasks: Vec<String>,
    /// Malformed lines skipped across both files
    pub skipped_lines: usize,
    /// Experiment of the tracker run
    pub experiment_id: Option<String>,
    /// Tracker run, if one was started
    pub run_id: Option<String>,
    /// Metric values accepted by the tracker
    pub metrics_logged: usize,
    /// Stopped by an external interrupt
    pub interrupted: bool,
}

impl SpeedReport {
    /// Process exit code: 130 on interrupt, 1 when no task could be compared.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            130
        } else {
            u8::from(self.tasks.is_empty())
        }
    }

    const fn run_status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Killed
        } else if self.tasks.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Finished
        }
    }
}

impl fmt::Display for SpeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Speed analysis for {}", self.model_name)?;
        writeln!(
            f,
            "  {:<16} {:>10} {:>10} {:>8} {:>10}",
            "TASK", "TOK/S", "BASELINE", "SPEEDUP", "ACCEPT"
        )?;
        for task in &self.tasks {
            let accept = task
                .acceptance_rate
                .map_or_else(|| "-".to_string(), |rate| format!("{rate:.3}"));
            writeln!(
                f,
                "  {:<16} {:>10.1} {:>10.1} {:>7.2}x {:>10}",
                task.task,
                task.tokens_per_second,
                task.tokens_per_second_baseline,
                task.speedup_ratio,
                accept
            )?;
        }
        if !self.skipped_tasks.is_empty() {
            writeln!(f, "  no data:     {}", self.skipped_tasks.join(", "))?;
        }
        if self.skipped_lines > 0 {
            writeln!(f, "  skipped:     {} malformed lines", self.skipped_lines)?;
        }
        if let Some(run) = &self.run_id {
            writeln!(
                f,
                "  tracker run: {run} (experiment {}, {} metrics)",
                self.experiment_id.as_deref().unwrap_or("-"),
                self.metrics_logged
            )?;
        }
        if self.interrupted {
            writeln!(f, "  interrupted")?;
        }
        Ok(())
    }
}

async fn read_records(path: &Path) -> Result<(Vec<BenchmarkRecord>, usize)> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        tracing::error!(error = %e, file = %path.display(), "cannot read result file");
        e
    })?;
    let parsed = parse_records(&bytes);
    Ok((parsed.records, parsed.skipped))
}

/// Read both files and compare every task.
///
/// # Errors
///
/// Returns an IO error if either file cannot be read.
pub async fn compare_files(request: &SpeedRequest) -> Result<SpeedReport> {
    let (model, model_skipped) = read_records(&request.model_file).await?;
    let (baseline, baseline_skipped) = read_records(&request.baseline_file).await?;

    let mut report = SpeedReport {
        model_name: request.model_name.clone(),
        skipped_lines: model_skipped + baseline_skipped,
        ..SpeedReport::default()
    };
    for task in SPEED_TASKS {
        match TaskSpeed::compare(&model, &baseline, task) {
            Some(speed) => {
                tracing::info!(
                    task,
                    speedup = speed.speedup_ratio,
                    tokens_per_second = speed.tokens_per_second,
                    "compared task"
                );
                report.tasks.push(speed);
            }
            None => {
                tracing::warn!(task, "no comparable records, skipping task");
                report.skipped_tasks.push(task.to_string());
            }
        }
    }
    Ok(report)
}

/// Compare the files of `request` and log the result as one tracker run.
///
/// Files are read before any run exists, so an unreadable file leaves no
/// trace in the tracker. Once started, the run is closed on every path:
/// killed when `shutdown` resolves first, failed when no task compared.
///
/// # Errors
///
/// Returns an IO error if either file cannot be read.
pub async fn analyze_speed<B, F>(
    tracker: &ExperimentTracker<B>,
    request: &SpeedRequest,
    shutdown: F,
) -> Result<SpeedReport>
where
    B: TrackingBackend,
    F: Future<Output = ()>,
{
    let mut report = compare_files(request).await?;
    if !tracker.is_enabled() {
        return Ok(report);
    }

    report.experiment_id = Some(tracker.experiment_id().to_string());
    let run_name = format!("speed_analysis_{}", request.model_name);
    report.run_id = tracker.start_run(&run_name, BTreeMap::new()).await;

    let log = async {
        tracker.log_params(&request.params()).await;
        for task in &report.tasks {
            tracker.log_metrics(&task.metrics(), None).await;
        }
    };
    let interrupted = tokio::select! {
        biased;
        () = shutdown => true,
        () = log => false,
    };
    if interrupted {
        tracing::warn!(model = %request.model_name, "speed analysis interrupted");
    }
    report.interrupted = interrupted;

    tracker.end_run(report.run_status()).await;
    report.metrics_logged = tracker.metrics_logged();
    Ok(report)
}

/// Run a speed analysis against the tracker described by `config`.
///
/// With `use_tracker` unset, or an unusable tracker, the comparison is only
/// reported.
///
/// # Errors
///
/// Returns an IO error if either file cannot be read.
pub async fn run_speed<F>(
    config: &Config,
    request: &SpeedRequest,
    use_tracker: bool,
    shutdown: F,
) -> Result<SpeedReport>
where
    F: Future<Output = ()>,
{
    let tracker = if use_tracker {
        ExperimentTracker::<MlflowBackend>::from_config(
            &config.tracker,
            config.experiment.default_tags.clone(),
        )
        .await
    } else {
        ExperimentTracker::disabled()
    };
    analyze_speed(&tracker, request, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Choice;
    use crate::tracking::MemoryBackend;

    fn record(category: &str, wall: &[f64], tokens: &[f64], accept: &[f64]) -> BenchmarkRecord {
        BenchmarkRecord::with_choice(Choice::new(
            wall.to_vec(),
            Vec::new(),
            tokens.to_vec(),
            accept.to_vec(),
        ))
        .with_category(category)
    }

    fn line(category: &str, wall: f64, tokens: f64, accept: &[f64]) -> String {
        format!(
            "{{\"category\":\"{category}\",\"choices\":[{{\"wall_time\":[{wall}],\"new_tokens\":[{tokens}],\"accept_lengths\":{accept:?}}}]}}\n"
        )
    }

    fn write_pair(dir: &Path) -> SpeedRequest {
        let model = dir.join("vicuna-eagle.jsonl");
        let baseline = dir.join("vicuna-vanilla.jsonl");
        std::fs::write(
            &model,
            line("writing", 1.0, 90.0, &[3.0, 0.0]) + &line("qa", 2.0, 100.0, &[1.0, 2.0]),
        )
        .unwrap();
        std::fs::write(
            &baseline,
            line("writing", 3.0, 90.0, &[]) + &line("qa", 4.0, 100.0, &[]),
        )
        .unwrap();
        SpeedRequest {
            model_name: "vicuna".to_string(),
            model_file: model,
            baseline_file: baseline,
            tokenizer_path: Some("lmsys/vicuna-7b-v1.3".to_string()),
        }
    }

    #[test]
    fn test_mt_bench_groups_categories() {
        let model = vec![
            record("writing", &[1.0], &[40.0], &[]),
            record("coding", &[1.0], &[20.0], &[]),
            record("translation", &[1.0], &[1000.0], &[]),
        ];
        assert_eq!(task_throughputs(&model, "mt_bench"), vec![40.0, 20.0]);
        assert_eq!(task_throughputs(&model, "translation"), vec![1000.0]);
        assert_eq!(task_throughputs(&model, "overall").len(), 3);
        assert!(task_throughputs(&model, "rag").is_empty());
    }

    #[test]
    fn test_untimed_records_are_left_out() {
        let model = vec![
            record("qa", &[0.0], &[40.0], &[]),
            record("qa", &[1.0, 1.0], &[10.0, 30.0], &[]),
        ];
        assert_eq!(task_throughputs(&model, "qa"), vec![20.0]);
    }

    #[test]
    fn test_compare_without_accept_lengths() {
        let model = vec![record("rag", &[1.0], &[30.0], &[])];
        let baseline = vec![record("rag", &[1.0], &[10.0], &[])];
        let speed = TaskSpeed::compare(&model, &baseline, "rag").unwrap();

        assert!((speed.speedup_ratio - 3.0).abs() < 1e-12);
        assert!(speed.acceptance_rate.is_none());
        let metrics = speed.metrics();
        let keys: Vec<&str> = metrics.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["rag_speedup_ratio", "rag_tokens_per_second", "rag_tokens_per_second_baseline"]
        );
    }

    #[test]
    fn test_compare_needs_both_sides() {
        let model = vec![record("qa", &[1.0], &[30.0], &[])];
        assert!(TaskSpeed::compare(&model, &[], "qa").is_none());
        assert!(TaskSpeed::compare(&[], &model, "qa").is_none());
        let idle = vec![record("qa", &[1.0], &[0.0], &[])];
        assert!(TaskSpeed::compare(&model, &idle, "qa").is_none());
    }

    #[tokio::test]
    async fn test_analysis_logged_as_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let request = write_pair(dir.path());
        let tracker = ExperimentTracker::connect(MemoryBackend::new(), "exp", BTreeMap::new()).await;

        let report = analyze_speed(&tracker, &request, std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.exit_code(), 0);
        let tasks: Vec<&str> = report.tasks.iter().map(|t| t.task.as_str()).collect();
        assert_eq!(tasks, vec!["mt_bench", "qa", "overall"]);
        assert_eq!(
            report.skipped_tasks,
            vec!["translation", "summarization", "math_reasoning", "rag"]
        );

        let backend = tracker.backend().unwrap();
        let run = backend.run(report.run_id.as_deref().unwrap()).unwrap();
        assert_eq!(run.status(), RunStatus::Finished);
        assert_eq!(run.params()["model_file"], "vicuna-eagle.jsonl");
        assert_eq!(run.params()["tokenizer_path"], "lmsys/vicuna-7b-v1.3");
        assert_eq!(report.experiment_id.as_deref(), Some(tracker.experiment_id()));

        let metrics = backend.metrics(report.run_id.as_deref().unwrap());
        let value = |key: &str| metrics.iter().find(|m| m.key() == key).map(|m| m.value());
        // writing: 90 tok/s against 30 tok/s
        assert_eq!(value("mt_bench_speedup_ratio"), Some(3.0));
        assert_eq!(value("mt_bench_acceptance_rate"), Some(0.5));
        assert_eq!(value("qa_max_accept_length"), Some(2.0));
        assert_eq!(report.metrics_logged, metrics.len());
        assert_eq!(metrics.len(), 18);
    }

    #[tokio::test]
    async fn test_interrupt_kills_speed_run() {
        let dir = tempfile::tempdir().unwrap();
        let request = write_pair(dir.path());
        let tracker = ExperimentTracker::connect(MemoryBackend::new(), "exp", BTreeMap::new()).await;

        let report = analyze_speed(&tracker, &request, async {}).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.exit_code(), 130);
        let run = tracker
            .backend()
            .unwrap()
            .run(report.run_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(run.status(), RunStatus::Killed);
        assert!(tracker.active_run_id().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_starts_no_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = write_pair(dir.path());
        request.baseline_file = dir.path().join("missing.jsonl");
        let tracker = ExperimentTracker::connect(MemoryBackend::new(), "exp", BTreeMap::new()).await;

        let err = analyze_speed(&tracker, &request, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
        assert_eq!(tracker.backend().unwrap().run_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_tracker_still_reports() {
        let dir = tempfile::tempdir().unwrap();
        let request = write_pair(dir.path());
        let tracker = ExperimentTracker::<MemoryBackend>::disabled();

        let report = analyze_speed(&tracker, &request, async {}).await.unwrap();
        assert!(!report.interrupted);
        assert!(report.run_id.is_none());
        assert_eq!(report.tasks.len(), 3);
        let text = report.to_string();
        assert!(text.starts_with("Speed analysis for vicuna"));
        assert!(text.contains("no data:     translation, summarization, math_reasoning, rag"));
    }
}
