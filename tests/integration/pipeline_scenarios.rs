//! curl, tracing and transfer progress over the assembled pipeline.

use crate::integration::test_utils::{
    isolated_loader, mount_token, password_overrides, requests_to, ACCESS_TOKEN,
};
use opsplane::cli::{Commands, RunContext};
use opsplane::commands::STAGED_PATH;
use opsplane::config::ConfigOverrides;
use opsplane::credentials::{CredentialStore, Identity, TlsTrust};
use opsplane::pipeline::{PipelineBuilder, PipelineOptions};
use opsplane::transport::{
    ApiRequest, DiagnosticSink, Executor, ProgressDisplay, ProgressSnapshot, TransferPhase,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_curl_downloads_to_file_and_prints_head() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    let payload = vec![b'x'; 200_000];
    Mock::given(method("GET"))
        .and(path("/api/v0/stemcell_assignments"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(payload.clone()),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("download.bin");
    let (sink, buffer) = DiagnosticSink::capture();
    let context =
        RunContext::with_loader(isolated_loader(), password_overrides(&server)).with_sink(sink);

    let command = Commands::Curl {
        path: "/api/v0/stemcell_assignments".to_string(),
        request: "GET".to_string(),
        data: None,
        input_file: None,
        output_file: Some(out.clone()),
        headers: Vec::new(),
        silent: false,
    };
    let output = context.execute_async(&command).await.unwrap();
    assert!(output.is_empty());
    assert_eq!(std::fs::read(&out).unwrap(), payload);

    let diagnostics = buffer.contents();
    assert!(diagnostics.contains("Status: 200 OK"), "got: {}", diagnostics);
    assert!(diagnostics.contains("content-type: application/octet-stream"));
    assert!(diagnostics.contains("downloading"), "got: {}", diagnostics);
}

#[tokio::test]
async fn test_curl_streams_input_file() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("POST"))
        .and(path("/api/v0/available_products"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut input = tempfile::NamedTempFile::new().unwrap();
    let payload = vec![7u8; 150_000];
    input.write_all(&payload).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let (sink, buffer) = DiagnosticSink::capture();
    let context =
        RunContext::with_loader(isolated_loader(), password_overrides(&server)).with_sink(sink);
    let command = Commands::Curl {
        path: "/api/v0/available_products".to_string(),
        request: "post".to_string(),
        data: None,
        input_file: Some(input.path().to_path_buf()),
        output_file: Some(dir.path().join("response")),
        headers: vec!["Content-Type: application/octet-stream".to_string()],
        silent: true,
    };
    context.execute_async(&command).await.unwrap();

    let uploads = requests_to(&server, "/api/v0/available_products").await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].body, payload);
    let diagnostics = buffer.contents();
    assert!(diagnostics.contains("uploaded"), "got: {}", diagnostics);
    assert!(!diagnostics.contains("Status:"));
}

#[tokio::test]
async fn test_curl_error_status_fails_after_output() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("body.txt");
    let (sink, buffer) = DiagnosticSink::capture();
    let context =
        RunContext::with_loader(isolated_loader(), password_overrides(&server)).with_sink(sink);
    let command = Commands::Curl {
        path: "/api/v0/missing".to_string(),
        request: "GET".to_string(),
        data: None,
        input_file: None,
        output_file: Some(out.clone()),
        headers: Vec::new(),
        silent: false,
    };
    let err = context.execute_async(&command).await.unwrap_err();
    assert_eq!(err.to_string(), "server responded with 404 Not Found");
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "not here");
    assert!(buffer.contents().contains("Status: 404 Not Found"));
}

#[tokio::test]
async fn test_trace_masks_secrets_end_to_end() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("DELETE"))
        .and(path(STAGED_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"echo":{"password":"hunter2-password"},"ok":true}"#),
        )
        .mount(&server)
        .await;

    let (sink, buffer) = DiagnosticSink::capture();
    let overrides = ConfigOverrides {
        trace: Some(true),
        ..password_overrides(&server)
    };
    let output = RunContext::with_loader(isolated_loader(), overrides)
        .with_sink(sink)
        .execute_async(&Commands::RevertStagedChanges)
        .await
        .unwrap();
    assert_eq!(output, "Changes Reverted.");

    let transcript = buffer.contents();
    assert!(transcript.contains("> DELETE "), "got: {}", transcript);
    assert!(transcript.contains("< 200 OK"), "got: {}", transcript);
    assert!(transcript.contains("[REDACTED]"));
    assert!(!transcript.contains("hunter2-password"));
    assert!(!transcript.contains(ACCESS_TOKEN));
}

#[derive(Default)]
struct RecordingDisplay {
    updates: Mutex<Vec<ProgressSnapshot>>,
    finished: Mutex<Vec<ProgressSnapshot>>,
}

impl ProgressDisplay for RecordingDisplay {
    fn update(&self, snapshot: &ProgressSnapshot) {
        self.updates.lock().push(*snapshot);
    }

    fn finish(&self, snapshot: &ProgressSnapshot) {
        self.finished.lock().push(*snapshot);
    }
}

#[tokio::test]
async fn test_download_progress_reaches_total_once() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    let payload = vec![1u8; 300_000];
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload.clone())
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;

    let display = Arc::new(RecordingDisplay::default());
    let (sink, _buffer) = DiagnosticSink::capture();
    let pipeline = PipelineBuilder::new(
        server.uri(),
        CredentialStore::new(
            Identity::from_parts(Some("admin"), Some("pw"), None, None),
            TlsTrust::default(),
        ),
        PipelineOptions {
            progress_interval: Duration::from_millis(10),
            ..PipelineOptions::default()
        },
    )
    .with_sink(sink)
    .with_progress_display(display.clone())
    .build()
    .unwrap();

    let body = pipeline
        .authenticated_progress
        .execute(ApiRequest::get("/download"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.len(), payload.len());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let finished = display.finished.lock().clone();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].phase, TransferPhase::Downloading);
    assert_eq!(finished[0].bytes_transferred, payload.len() as u64);
    assert_eq!(finished[0].bytes_total, Some(payload.len() as u64));

    let updates = display.updates.lock().clone();
    assert!(updates
        .windows(2)
        .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
}
