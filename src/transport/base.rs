//! Base executor: the innermost layer, bound to the controller target.
//!
//! Applies connect and request timeouts and TLS trust. Never retries; failures
//! propagate verbatim as [`TransportError::Connection`] or [`TransportError::Timeout`].

use crate::credentials::TlsTrust;
use crate::error::{ApiError, TransportError};
use crate::transport::message::{ApiRequest, ApiResponse, RequestBody};
use crate::transport::Executor;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1800);

/// Parse the configured target, defaulting the scheme to https.
pub fn normalize_target(target: &str) -> Result<Url, ApiError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ApiError::ConfigError(
            "target is required (set --target or OPSPLANE_TARGET)".to_string(),
        ));
    }
    let with_scheme = if target.contains("://") {
        target.to_string()
    } else {
        format!("https://{}", target)
    };
    Url::parse(&with_scheme)
        .map_err(|e| ApiError::ConfigError(format!("invalid target {:?}: {}", target, e)))
}

fn build_http_client(
    tls: &TlsTrust,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Client, ApiError> {
    let mut builder = Client::builder()
        .connect_timeout(connect_timeout)
        .redirect(Policy::none());

    if !request_timeout.is_zero() {
        builder = builder.timeout(request_timeout);
    }

    if tls.skip_validation {
        if tls.ca_cert.is_some() {
            warn!("CA certificate ignored because TLS validation is skipped");
        }
        builder = builder.danger_accept_invalid_certs(true);
    } else if let Some(pem) = tls.ca_pem()? {
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| ApiError::ConfigError(format!("invalid CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Render an error with its source chain; reqwest's top-level message alone rarely says
/// what went wrong.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let message = error_chain(&err);
    if err.is_timeout() {
        TransportError::Timeout(message)
    } else if err.is_builder() {
        TransportError::InvalidRequest(message)
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(message)
    } else {
        TransportError::Connection(message)
    }
}

pub struct BaseExecutor {
    client: Client,
    target: Url,
}

impl BaseExecutor {
    pub fn new(
        target: &str,
        tls: &TlsTrust,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let target = normalize_target(target)?;
        let client = build_http_client(tls, connect_timeout, request_timeout)?;
        Ok(Self { client, target })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Resolve a request path against the target. Absolute URLs pass through unchanged;
    /// relative paths are appended to the target, keeping any path prefix it carries.
    pub fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .map_err(|e| TransportError::InvalidRequest(format!("url {:?}: {}", path, e)));
        }
        let base = self.target.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };
        Url::parse(&joined)
            .map_err(|e| TransportError::InvalidRequest(format!("path {:?}: {}", path, e)))
    }
}

#[async_trait]
impl Executor for BaseExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(&request.path)?;
        let ApiRequest {
            method,
            headers,
            body,
            ..
        } = request;

        debug!(method = %method, url = %url, body = ?body, "Sending controller request");

        let mut builder = self.client.request(method, url).headers(headers);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream { stream, length } => {
                let builder = builder.body(reqwest::Body::wrap_stream(stream));
                match length {
                    Some(length) => builder.header(CONTENT_LENGTH, length),
                    None => builder,
                }
            }
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        debug!(status = %status, content_length = ?content_length, "Controller responded");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(ApiResponse::new(
            status,
            headers,
            content_length,
            Box::pin(body),
        ))
    }
}
