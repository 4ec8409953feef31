//! Tests for error types

use bench_publish::Error;

#[test]
fn test_config_error() {
    let error = Error::Config("store.endpoint is required".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("store.endpoint"));
    assert!(error.is_fatal());
}

#[test]
fn test_auth_error() {
    let error = Error::Auth {
        service: "lakefs",
        message: "HTTP 401 Unauthorized".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Authentication failed for lakefs"));
    assert!(error_str.contains("401"));
    assert!(error.is_fatal());
}

#[test]
fn test_connectivity_error() {
    let error = Error::Connectivity {
        service: "mlflow",
        message: "connection refused".to_string(),
    };
    assert_eq!(format!("{error}"), "Cannot reach mlflow: connection refused");
    assert!(error.is_fatal());
}

#[test]
fn test_upload_error_is_isolated() {
    let error = Error::Upload {
        path: "results/20250101_120000/mt-bench.jsonl".to_string(),
        message: "HTTP 500".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Failed to upload 'results/20250101_120000/mt-bench.jsonl'"));
    assert!(!error.is_fatal());
}

#[test]
fn test_commit_error() {
    let error = Error::Commit {
        branch: "experiment_20250101_120000".to_string(),
        message: "no changes".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Failed to commit on branch 'experiment_20250101_120000'"));
    assert!(error.is_fatal());
}

#[test]
fn test_parse_error() {
    let error = Error::Parse {
        line: 7,
        message: "expected value".to_string(),
    };
    assert_eq!(format!("{error}"), "Parse error at line 7: expected value");
    assert!(!error.is_fatal());
}

#[test]
fn test_store_and_tracker_errors() {
    assert!(format!("{}", Error::Store("HTTP 502".to_string())).starts_with("Store error"));
    assert!(format!("{}", Error::Tracker("HTTP 502".to_string())).starts_with("Tracker error"));
    assert!(!Error::Tracker(String::new()).is_fatal());
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(!error.is_fatal());
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_error_debug() {
    let error = Error::Config("bad".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Config"));
}
