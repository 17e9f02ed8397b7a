//! CLI route: single route table and run context. Dispatches to command services.

use crate::cli::output::format_response_head;
use crate::cli::parse::{Cli, Commands};
use crate::commands::{ControllerCommandService, CurlBody, CurlRequest};
use crate::config::{ConfigLoader, ConfigOverrides};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::transport::DiagnosticSink;
use anyhow::{bail, Context};
use reqwest::Method;
use tracing::{debug, info};

/// Runtime context for CLI execution: how to resolve settings and where diagnostics go.
/// The pipeline is assembled per command, so `version` never needs a target.
pub struct RunContext {
    loader: ConfigLoader,
    overrides: ConfigOverrides,
    sink: DiagnosticSink,
}

impl RunContext {
    pub fn new(cli: &Cli) -> Self {
        let mut loader = ConfigLoader::new();
        if let Some(env) = &cli.env {
            loader = loader.with_env_file(env);
        }
        let overrides = ConfigOverrides {
            target: cli.target.clone(),
            username: cli.username.clone(),
            password: cli.password.clone(),
            client_id: cli.client_id.clone(),
            client_secret: cli.client_secret.clone(),
            ca_cert: cli.ca_cert.clone(),
            skip_ssl_validation: cli.skip_ssl_validation.then_some(true),
            decryption_passphrase: cli.decryption_passphrase.clone(),
            connect_timeout: cli.connect_timeout,
            request_timeout: cli.request_timeout,
            trace: cli.trace.then_some(true),
        };
        Self::with_loader(loader, overrides)
    }

    pub fn with_loader(loader: ConfigLoader, overrides: ConfigOverrides) -> Self {
        Self {
            loader,
            overrides,
            sink: DiagnosticSink::stderr(),
        }
    }

    /// Destination for trace, progress and curl response heads.
    pub fn with_sink(mut self, sink: DiagnosticSink) -> Self {
        self.sink = sink;
        self
    }

    /// Execute a CLI command via the single route table, on a runtime owned by this call.
    pub fn execute(&self, command: &Commands) -> anyhow::Result<String> {
        if let Commands::Version = command {
            return Ok(env!("CARGO_PKG_VERSION").to_string());
        }
        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        runtime.block_on(self.execute_async(command))
    }

    /// Route table. Returns text for stdout; empty when the command wrote its own output.
    pub async fn execute_async(&self, command: &Commands) -> anyhow::Result<String> {
        match command {
            Commands::Version => Ok(env!("CARGO_PKG_VERSION").to_string()),
            Commands::RevertStagedChanges => {
                let pipeline = self.pipeline()?;
                let outcome =
                    ControllerCommandService::revert_staged_changes(pipeline.authenticated.as_ref())
                        .await
                        .context("request failed")
                        .context("revert staged changes command failed")?;
                Ok(outcome.message().to_string())
            }
            Commands::Curl {
                path,
                request,
                data,
                input_file,
                output_file,
                headers,
                silent,
            } => {
                let method = Method::from_bytes(request.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid request method {:?}", request))?;
                let body = match (data, input_file) {
                    (Some(data), _) => CurlBody::Data(data.clone()),
                    (None, Some(file)) => CurlBody::File(file.clone()),
                    (None, None) => CurlBody::None,
                };
                let streaming = input_file.is_some() || output_file.is_some();
                let api_request = ControllerCommandService::curl_request(CurlRequest {
                    method,
                    path: path.clone(),
                    headers: headers.clone(),
                    body,
                })
                .await
                .context("curl command failed")?;

                let pipeline = self.pipeline()?;
                let executor = if streaming {
                    &pipeline.authenticated_progress
                } else {
                    &pipeline.authenticated
                };
                let result = ControllerCommandService::curl(
                    executor.as_ref(),
                    api_request,
                    output_file.as_deref(),
                )
                .await
                .context("curl command failed")?;
                debug!(status = %result.status, bytes = result.bytes_written, "curl finished");

                if !silent {
                    let head = format_response_head(result.status, &result.headers);
                    let _ = self.sink.write_line(&head);
                }
                if result.status.is_client_error() || result.status.is_server_error() {
                    bail!("server responded with {}", result.status);
                }
                Ok(String::new())
            }
        }
    }

    fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let settings = self.loader.load(&self.overrides)?;
        let target = settings.require_target()?;
        let pipeline = PipelineBuilder::new(
            target,
            settings.credential_store(),
            settings.pipeline_options(),
        )
        .with_sink(self.sink.clone())
        .build()?;
        info!(controller = %pipeline.target(), "Pipeline ready");
        Ok(pipeline)
    }
}
