//! Decryption gate against a mock controller that takes a while to come up.

use crate::integration::test_utils::{mount_token, mount_unlocked, requests_to};
use opsplane::credentials::{CredentialStore, Identity, TlsTrust};
use opsplane::error::TransportError;
use opsplane::pipeline::{Pipeline, PipelineBuilder, PipelineOptions};
use opsplane::transport::{
    ApiRequest, DecryptionState, DiagnosticSink, Executor, GatePolicy, AVAILABILITY_PATH,
    UNLOCK_PATH,
};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gated_pipeline(server: &MockServer, policy: GatePolicy) -> Pipeline {
    let credentials = CredentialStore::new(
        Identity::from_parts(Some("admin"), Some("pw"), None, None),
        TlsTrust::default(),
    );
    let options = PipelineOptions {
        decryption_passphrase: Some("open-sesame".to_string()),
        gate: policy,
        ..PipelineOptions::default()
    };
    let (sink, _buffer) = DiagnosticSink::capture();
    PipelineBuilder::new(server.uri(), credentials, options)
        .with_sink(sink)
        .build()
        .unwrap()
}

fn fast_policy() -> GatePolicy {
    GatePolicy {
        backoff: Duration::from_millis(10),
        max_probes: 50,
        deadline: Duration::from_secs(10),
    }
}

async fn mount_info(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v0/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"info":{}}"#))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_gate_waits_for_boot_then_passes_through() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("GET"))
        .and(path(AVAILABILITY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("Waiting for authentication system to start..."),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_unlocked(&server).await;
    mount_info(&server).await;

    let pipeline = gated_pipeline(&server, fast_policy());
    for _ in 0..3 {
        let response = pipeline
            .authenticated
            .execute(ApiRequest::get("/api/v0/info"))
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 200);
    }

    let gate = pipeline.gate().unwrap();
    assert_eq!(gate.state().await, DecryptionState::Unlocked);
    assert_eq!(gate.probe_count(), 3);
    assert_eq!(requests_to(&server, AVAILABILITY_PATH).await.len(), 3);
    assert!(requests_to(&server, UNLOCK_PATH).await.is_empty());
    assert_eq!(requests_to(&server, "/api/v0/info").await.len(), 3);
}

#[tokio::test]
async fn test_gate_retries_unlock_until_accepted() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("GET"))
        .and(path(AVAILABILITY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(UNLOCK_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(UNLOCK_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_info(&server).await;

    let pipeline = gated_pipeline(&server, fast_policy());
    pipeline
        .authenticated
        .execute(ApiRequest::get("/api/v0/info"))
        .await
        .unwrap();
    assert_eq!(requests_to(&server, UNLOCK_PATH).await.len(), 3);
    assert_eq!(pipeline.gate().unwrap().probe_count(), 3);
}

#[tokio::test]
async fn test_gate_gives_up_after_max_probes() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("GET"))
        .and(path(AVAILABILITY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(UNLOCK_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_info(&server).await;

    let policy = GatePolicy {
        max_probes: 4,
        ..fast_policy()
    };
    let pipeline = gated_pipeline(&server, policy);
    let err = pipeline
        .authenticated
        .execute(ApiRequest::get("/api/v0/info"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::DecryptionTimeout { attempts: 4, .. }
    ));
    assert_eq!(requests_to(&server, AVAILABILITY_PATH).await.len(), 4);
    assert!(requests_to(&server, "/api/v0/info").await.is_empty());
}

#[tokio::test]
async fn test_gate_surfaces_rejected_passphrase() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    Mock::given(method("GET"))
        .and(path(AVAILABILITY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(UNLOCK_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("wrong passphrase"))
        .mount(&server)
        .await;

    let pipeline = gated_pipeline(&server, fast_policy());
    let err = pipeline
        .authenticated
        .execute(ApiRequest::get("/api/v0/info"))
        .await
        .unwrap_err();
    match err.root() {
        TransportError::Decryption { status, body } => {
            assert_eq!(status.as_u16(), 403);
            assert!(body.contains("wrong passphrase"));
        }
        other => panic!("expected a decryption error, got {:?}", other),
    }
    assert_eq!(requests_to(&server, UNLOCK_PATH).await.len(), 1);
}
