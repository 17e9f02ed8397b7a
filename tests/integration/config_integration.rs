//! Settings resolution: env file, environment variables and flags feeding a real run.

use crate::integration::test_utils::{isolated_loader, mount_token, requests_to};
use config::Map;
use opsplane::cli::{Commands, RunContext};
use opsplane::commands::STAGED_PATH;
use opsplane::config::{ConfigLoader, ConfigOverrides};
use opsplane::transport::{DiagnosticSink, TOKEN_PATH};
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn env_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

async fn mount_staged(server: &MockServer) {
    Mock::given(method("DELETE"))
        .and(path(STAGED_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn run_context(loader: ConfigLoader, overrides: ConfigOverrides) -> RunContext {
    let (sink, _buffer) = DiagnosticSink::capture();
    RunContext::with_loader(loader, overrides).with_sink(sink)
}

#[tokio::test]
async fn test_env_file_supplies_connection() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_staged(&server).await;

    let file = env_file(&format!(
        "target: {}\nclient-id: ci-client\nclient-secret: ci-secret\nrequest-timeout: 30\n",
        server.uri()
    ));
    let loader = isolated_loader().with_env_file(file.path());
    let output = run_context(loader, ConfigOverrides::default())
        .execute_async(&Commands::RevertStagedChanges)
        .await
        .unwrap();
    assert_eq!(output, "Changes Reverted.");

    let token_calls = requests_to(&server, TOKEN_PATH).await;
    assert_eq!(token_calls.len(), 1);
    let form = String::from_utf8(token_calls[0].body.clone()).unwrap();
    assert!(form.contains("grant_type=client_credentials"));
}

#[tokio::test]
async fn test_flag_target_beats_environment_and_env_file() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_staged(&server).await;

    let file = env_file("target: https://env-file.invalid\nusername: admin\npassword: pw\n");
    let mut environment = Map::new();
    environment.insert(
        "OPSPLANE_TARGET".to_string(),
        "https://environment.invalid".to_string(),
    );
    let loader = ConfigLoader::new()
        .with_env_file(file.path())
        .with_environment(environment);
    let overrides = ConfigOverrides {
        target: Some(server.uri()),
        ..ConfigOverrides::default()
    };

    let output = run_context(loader, overrides)
        .execute_async(&Commands::RevertStagedChanges)
        .await
        .unwrap();
    assert_eq!(output, "Changes Reverted.");
    assert_eq!(requests_to(&server, STAGED_PATH).await.len(), 1);
}

#[tokio::test]
async fn test_environment_beats_env_file() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_staged(&server).await;

    let file = env_file("target: https://env-file.invalid\nusername: admin\npassword: pw\n");
    let mut environment = Map::new();
    environment.insert("OPSPLANE_TARGET".to_string(), server.uri());
    let loader = ConfigLoader::new()
        .with_env_file(file.path())
        .with_environment(environment);

    run_context(loader, ConfigOverrides::default())
        .execute_async(&Commands::RevertStagedChanges)
        .await
        .unwrap();
    assert_eq!(requests_to(&server, STAGED_PATH).await.len(), 1);
}

#[tokio::test]
async fn test_placeholder_in_env_file_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    mount_token(&server, 3600).await;
    mount_staged(&server).await;

    let file = env_file(&format!(
        "target: {}\nusername: admin\npassword: ((admin_password))\n",
        server.uri()
    ));
    let loader = isolated_loader().with_env_file(file.path());
    let err = run_context(loader, ConfigOverrides::default())
        .execute_async(&Commands::RevertStagedChanges)
        .await
        .unwrap_err();

    let rendered = format!("{:#}", err);
    assert!(rendered.contains("password"), "got: {}", rendered);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unknown_env_file_key_is_rejected() {
    let file = env_file("target: https://c.example.com\nproduct-name: tile\n");
    let loader = isolated_loader().with_env_file(file.path());
    let err = run_context(loader, ConfigOverrides::default())
        .execute_async(&Commands::RevertStagedChanges)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("product-name"));
}

#[test]
fn test_version_needs_no_settings() {
    let loader = isolated_loader().with_env_file("/no/such/env.yml");
    let output = RunContext::with_loader(loader, ConfigOverrides::default())
        .execute(&Commands::Version)
        .unwrap();
    assert_eq!(output, env!("CARGO_PKG_VERSION"));
}
