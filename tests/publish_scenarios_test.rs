//! End-to-end publish scenarios against in-memory store and tracker, plus a
//! mock MLflow server for interrupts during run creation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bench_publish::publish::{
    PublishRequest, PublishSettings, PublishState, PublishStatus, Publisher,
};
use bench_publish::store::MemoryStore;
use bench_publish::tracking::{ExperimentTracker, MemoryBackend, MlflowBackend, RunStatus};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESULT_LINE: &str = concat!(
    r#"{"choices":[{"wall_time":[1.0,2.0],"decoding_steps":[4,6],"#,
    r#""new_tokens":[30,40],"accept_lengths":[2,0,3,1]}]}"#,
    "\n"
);

fn write_results(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, RESULT_LINE.repeat(3)).unwrap();
            path
        })
        .collect()
}

async fn tracker() -> ExperimentTracker<MemoryBackend> {
    ExperimentTracker::connect(MemoryBackend::new(), "spec-bench", BTreeMap::new()).await
}

#[tokio::test]
async fn test_partial_upload_failure_still_commits() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl", "b.jsonl", "c.jsonl"]);
    let store = MemoryStore::new("bench").with_failing_upload("/b.jsonl");
    let tracker = tracker().await;

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&PublishRequest::batch(dir.path(), files))
        .await;

    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.uploaded_files.len(), 3);
    assert_eq!(report.metadata_path.as_deref(), Some(report.uploaded_files[2].as_str()));
    assert!(report.uploaded_files[2].ends_with("/experiment_metadata.json"));
    assert_eq!(report.failed_files.len(), 1);
    assert!(report.failed_files[0].ends_with("b.jsonl"));

    let commits = store.commits();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].message.starts_with("Benchmark results from "));
    assert!(commits[0].message.contains("Uploaded 3 files:"));
    assert!(commits[0].message.contains("Failed to upload 1 files:\n- b.jsonl"));
    assert_eq!(store.committed_paths(&commits[0].id).len(), 3);

    let run = tracker.backend().unwrap().run(report.run_id.as_deref().unwrap()).unwrap();
    assert_eq!(run.status(), RunStatus::Finished);
}

#[tokio::test]
async fn test_no_results_fails_before_any_upload() {
    let store = MemoryStore::new("bench");
    let tracker = tracker().await;

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&PublishRequest::batch("empty", Vec::new()))
        .await;

    assert_eq!(report.status, PublishStatus::NoResults);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(store.put_calls(), 0);
    assert!(store.commits().is_empty());
    assert!(report.branch.is_none());
    assert_eq!(tracker.backend().unwrap().run_count(), 0);
}

#[tokio::test]
async fn test_unreachable_tracker_publishes_store_only() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["mt-bench.jsonl", "gsm8k.jsonl"]);
    let store = MemoryStore::new("bench");
    let tracker =
        ExperimentTracker::connect(MemoryBackend::new().unreachable(), "spec-bench", BTreeMap::new())
            .await;
    assert!(!tracker.is_enabled());

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&PublishRequest::batch(dir.path(), files))
        .await;

    assert!(report.is_success());
    assert_eq!(report.metrics_logged, 0);
    assert!(report.run_id.is_none());
    assert_eq!(store.commits().len(), 1);
}

#[tokio::test]
async fn test_all_uploads_failing_skips_commit() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl", "b.jsonl"]);
    let store = MemoryStore::new("bench").with_failing_upload(".jsonl");
    let tracker = tracker().await;

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&PublishRequest::batch(dir.path(), files))
        .await;

    assert_eq!(report.status, PublishStatus::NoUploads);
    assert!(report.uploaded_files.is_empty());
    assert_eq!(report.failed_files.len(), 2);
    assert!(report.metadata_path.is_none());
    assert!(store.commits().is_empty());

    let backend = tracker.backend().unwrap();
    let run_id = report.run_id.as_deref().unwrap();
    assert_eq!(backend.run(run_id).unwrap().status(), RunStatus::Failed);
    let success_rate = backend
        .metrics(run_id)
        .into_iter()
        .find(|m| m.key() == "upload_success_rate")
        .unwrap();
    assert!(success_rate.value().abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_model_name_is_sanitized_into_branch() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["answers.jsonl"]);
    let store = MemoryStore::new("bench");
    let tracker = ExperimentTracker::<MemoryBackend>::disabled();

    let request = PublishRequest::single(files[0].clone(), Some("--bad/name".to_string()));
    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&request)
        .await;

    assert!(report.is_success());
    let branch = report.branch.unwrap();
    let model_part = branch
        .strip_prefix("experiment_")
        .and_then(|rest| rest.rsplit_once('_'))
        .map(|(model, _date)| model)
        .unwrap();
    assert!(model_part.starts_with("model_"));
    assert!(branch
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    assert!(store.has_branch(&branch));
}

#[tokio::test]
async fn test_commit_failure_marks_run_failed() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl"]);
    let store = MemoryStore::new("bench").with_failing_commit();
    let tracker = tracker().await;

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&PublishRequest::batch(dir.path(), files))
        .await;

    assert_eq!(report.status, PublishStatus::CommitFailed);
    assert_eq!(report.exit_code(), 1);
    assert!(report.commit_id.is_none());
    // Objects stay uploaded without a commit.
    assert_eq!(report.uploaded_files.len(), 2);

    let run = tracker.backend().unwrap().run(report.run_id.as_deref().unwrap()).unwrap();
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(!run.params().contains_key("store_commit_id"));
}

#[tokio::test]
async fn test_unreachable_store_creates_no_run() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl"]);
    let store = MemoryStore::new("bench").unreachable();
    let tracker = tracker().await;

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish(&PublishRequest::batch(dir.path(), files))
        .await;

    assert_eq!(report.status, PublishStatus::StoreUnavailable);
    assert_eq!(report.state, PublishState::Init);
    assert_eq!(store.put_calls(), 0);
    assert_eq!(tracker.backend().unwrap().run_count(), 0);
}

#[tokio::test]
async fn test_interrupt_closes_run_as_killed() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl"]);
    let store = MemoryStore::new("bench");
    let tracker = tracker().await;
    let run_id = tracker.start_run("pre-existing", BTreeMap::new()).await.unwrap();

    // Shutdown resolves before the pipeline gets polled to completion.
    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish_until(&PublishRequest::batch(dir.path(), files), async {})
        .await;

    assert_eq!(report.status, PublishStatus::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(report.state, PublishState::RunClosed);
    assert!(tracker.active_run_id().is_none());

    let run = tracker.backend().unwrap().run(&run_id).unwrap();
    assert_eq!(run.status(), RunStatus::Killed);
    assert!(!tracker.end_run(RunStatus::Finished).await);
}

#[tokio::test]
async fn test_interrupt_during_uploads_kills_pipeline_run() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl", "b.jsonl", "c.jsonl"]);
    let store = MemoryStore::new("bench").with_upload_delay(Duration::from_millis(200));
    let tracker = tracker().await;

    // Fires once the first upload is done and the second is in flight.
    let shutdown = async {
        while store.put_calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish_until(&PublishRequest::batch(dir.path(), files), shutdown)
        .await;

    assert_eq!(report.status, PublishStatus::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(report.state, PublishState::RunClosed);
    assert_eq!(report.uploaded_files.len(), 1);
    assert!(report.commit_id.is_none());
    assert!(store.commits().is_empty());

    let backend = tracker.backend().unwrap();
    assert_eq!(backend.run_count(), 1);
    let run = backend.run(report.run_id.as_deref().unwrap()).unwrap();
    assert_eq!(run.status(), RunStatus::Killed);
    assert!(!tracker.end_run(RunStatus::Finished).await);
}

#[tokio::test]
async fn test_interrupt_during_run_creation_still_closes_run() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl"]);
    let store = MemoryStore::new("bench");
    let tracker = ExperimentTracker::connect(
        MemoryBackend::new().with_create_delay(Duration::from_millis(200)),
        "spec-bench",
        BTreeMap::new(),
    )
    .await;
    let backend = tracker.backend().unwrap();

    // Fires as soon as the backend has created the run, before it answers.
    let shutdown = async {
        while backend.run_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish_until(&PublishRequest::batch(dir.path(), files), shutdown)
        .await;

    assert_eq!(report.status, PublishStatus::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(store.put_calls(), 0);
    assert!(store.commits().is_empty());

    assert_eq!(backend.run_count(), 1);
    let run = backend.run(report.run_id.as_deref().unwrap()).unwrap();
    assert_eq!(run.status(), RunStatus::Killed);
}

#[tokio::test]
async fn test_interrupt_during_slow_mlflow_run_creation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/mlflow/experiments/get-by-name"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"experiment": {"experiment_id": "1", "name": "spec-bench"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/create"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"run": {"info": {"run_id": "r1"}}}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/mlflow/runs/update"))
        .and(body_partial_json(json!({"run_id": "r1", "status": "KILLED"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl"]);
    let store = MemoryStore::new("bench");
    let backend = MlflowBackend::new(&server.uri(), "user", "pass").unwrap();
    let tracker = ExperimentTracker::connect(backend, "spec-bench", BTreeMap::new()).await;
    assert!(tracker.is_enabled());

    let shutdown = async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path().ends_with("/runs/create")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish_until(&PublishRequest::batch(dir.path(), files), shutdown)
        .await;

    assert_eq!(report.status, PublishStatus::Interrupted);
    assert_eq!(report.run_id.as_deref(), Some("r1"));
    assert!(store.commits().is_empty());

    let requests = server.received_requests().await.unwrap_or_default();
    let creates = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/runs/create"))
        .count();
    let updates = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/runs/update"))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(updates, creates);
}

#[tokio::test]
async fn test_late_shutdown_does_not_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_results(dir.path(), &["a.jsonl"]);
    let store = MemoryStore::new("bench");
    let tracker = tracker().await;

    let report = Publisher::new(&store, &tracker, PublishSettings::default())
        .publish_until(
            &PublishRequest::batch(dir.path(), files),
            tokio::time::sleep(Duration::from_secs(30)),
        )
        .await;

    assert!(report.is_success());
    let run = tracker.backend().unwrap().run(report.run_id.as_deref().unwrap()).unwrap();
    assert_eq!(run.status(), RunStatus::Finished);
}
