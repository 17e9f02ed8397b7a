//! Token reuse and refresh over real HTTP.

use crate::integration::test_utils::{header_value, mount_token, requests_to};
use opsplane::credentials::{CredentialStore, Identity, TlsTrust};
use opsplane::pipeline::{Pipeline, PipelineBuilder, PipelineOptions};
use opsplane::transport::{ApiRequest, DiagnosticSink, Executor, TOKEN_PATH};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESOURCE: &str = "/api/v0/deployed/products";

fn pipeline(server: &MockServer, identity: Identity) -> Pipeline {
    let (sink, _buffer) = DiagnosticSink::capture();
    PipelineBuilder::new(
        server.uri(),
        CredentialStore::new(identity, TlsTrust::default()),
        PipelineOptions::default(),
    )
    .with_sink(sink)
    .build()
    .unwrap()
}

fn password_identity() -> Identity {
    Identity::from_parts(Some("admin"), Some("pw"), None, None)
}

async fn mount_resource(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_token_is_reused_while_fresh() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_resource(&server).await;

    let pipeline = pipeline(&server, password_identity());
    for _ in 0..3 {
        pipeline
            .authenticated
            .execute(ApiRequest::get(RESOURCE))
            .await
            .unwrap();
    }
    assert_eq!(requests_to(&server, TOKEN_PATH).await.len(), 1);
    assert_eq!(requests_to(&server, RESOURCE).await.len(), 3);
}

#[tokio::test]
async fn test_token_inside_refresh_margin_is_replaced() {
    let server = MockServer::start().await;
    // Shorter than the refresh margin, so no request may reuse it.
    mount_token(&server, 2).await;
    mount_resource(&server).await;

    let pipeline = pipeline(&server, password_identity());
    for _ in 0..2 {
        pipeline
            .authenticated
            .execute(ApiRequest::get(RESOURCE))
            .await
            .unwrap();
    }
    assert_eq!(requests_to(&server, TOKEN_PATH).await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_token_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "shared", "expires_in": 3600 }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    mount_resource(&server).await;

    let pipeline = pipeline(&server, password_identity());
    let executor = pipeline.authenticated.clone();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(ApiRequest::get(RESOURCE)).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(requests_to(&server, TOKEN_PATH).await.len(), 1);
    let resources = requests_to(&server, RESOURCE).await;
    assert_eq!(resources.len(), 8);
    assert!(resources
        .iter()
        .all(|r| header_value(r, "authorization").as_deref() == Some("Bearer shared")));
}

#[tokio::test]
async fn test_password_grant_uses_public_client() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_resource(&server).await;

    let pipeline = pipeline(&server, password_identity());
    pipeline
        .authenticated
        .execute(ApiRequest::get(RESOURCE))
        .await
        .unwrap();

    let token_calls = requests_to(&server, TOKEN_PATH).await;
    let form = String::from_utf8(token_calls[0].body.clone()).unwrap();
    assert!(form.contains("grant_type=password"));
    assert!(form.contains("username=admin"));
    // base64("opsman:")
    assert_eq!(
        header_value(&token_calls[0], "authorization").as_deref(),
        Some("Basic b3BzbWFuOg==")
    );
}

#[tokio::test]
async fn test_client_credentials_grant() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_resource(&server).await;

    let identity = Identity::from_parts(None, None, Some("ci"), Some("ci-secret"));
    let pipeline = pipeline(&server, identity);
    pipeline
        .authenticated
        .execute(ApiRequest::get(RESOURCE))
        .await
        .unwrap();

    let token_calls = requests_to(&server, TOKEN_PATH).await;
    let form = String::from_utf8(token_calls[0].body.clone()).unwrap();
    assert!(form.contains("grant_type=client_credentials"));
    // base64("ci:ci-secret")
    assert_eq!(
        header_value(&token_calls[0], "authorization").as_deref(),
        Some("Basic Y2k6Y2ktc2VjcmV0")
    );
}
