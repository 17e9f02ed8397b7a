//! Trace recorder: a redacted transcript of each exchange on the diagnostic sink.
//!
//! Request lines are prefixed `>`, response lines `<`, failures `!`. Credential headers,
//! known secret values and secret JSON or form fields are replaced before anything is
//! written. The response body excerpt is peeked from the stream and replayed, so the
//! caller still reads the whole body.

use crate::error::TransportError;
use crate::transport::message::{ApiRequest, ApiResponse, RequestBody, ResponseStream};
use crate::transport::sink::DiagnosticSink;
use crate::transport::{Executor, SharedExecutor};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderName, AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, SET_COOKIE,
};
use reqwest::Url;
use tokio::time::Instant;

pub const DEFAULT_EXCERPT_LIMIT: usize = 1024;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: [HeaderName; 4] = [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, SET_COOKIE];

static JSON_SECRET_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"("(?:access_token|refresh_token|passphrase|password|client_secret)"\s*:\s*)"(?:[^"\\]|\\.)*""#,
    )
    .unwrap_or_else(|_| unreachable!())
});

static FORM_SECRET_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(access_token|refresh_token|passphrase|password|client_secret)=[^&\s]*")
        .unwrap_or_else(|_| unreachable!())
});

/// Masks secrets in trace text.
#[derive(Debug, Clone, Default)]
struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    fn redact(&self, text: &str) -> String {
        let masked = JSON_SECRET_FIELD.replace_all(text, format!("${{1}}\"{}\"", REDACTED));
        let mut masked = FORM_SECRET_FIELD
            .replace_all(&masked, format!("${{1}}={}", REDACTED))
            .into_owned();
        for secret in &self.secrets {
            masked = masked.replace(secret.as_str(), REDACTED);
        }
        masked
    }

    fn header_lines(&self, prefix: &str, headers: &HeaderMap) -> Vec<String> {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if SENSITIVE_HEADERS.contains(name) {
                    REDACTED.to_string()
                } else {
                    self.redact(&String::from_utf8_lossy(value.as_bytes()))
                };
                format!("{} {}: {}", prefix, name, value)
            })
            .collect()
    }
}

pub struct TraceRecorder {
    inner: SharedExecutor,
    sink: DiagnosticSink,
    target: Option<Url>,
    redactor: Redactor,
    excerpt_limit: usize,
}

impl TraceRecorder {
    pub fn new(inner: SharedExecutor, sink: DiagnosticSink) -> Self {
        Self {
            inner,
            sink,
            target: None,
            redactor: Redactor::default(),
            excerpt_limit: DEFAULT_EXCERPT_LIMIT,
        }
    }

    /// Show full URLs relative to this target.
    pub fn with_target(mut self, target: Url) -> Self {
        self.target = Some(target);
        self
    }

    /// Literal values to mask wherever they appear.
    pub fn with_secrets(mut self, secrets: impl IntoIterator<Item = String>) -> Self {
        self.redactor
            .secrets
            .extend(secrets.into_iter().filter(|s| !s.is_empty()));
        self
    }

    pub fn with_excerpt_limit(mut self, limit: usize) -> Self {
        self.excerpt_limit = limit;
        self
    }

    fn display_url(&self, path: &str) -> String {
        match &self.target {
            Some(target) if !path.starts_with("http://") && !path.starts_with("https://") => {
                format!("{}{}", target.as_str().trim_end_matches('/'), path)
            }
            _ => path.to_string(),
        }
    }

    fn request_lines(&self, request: &ApiRequest) -> Vec<String> {
        let mut lines = vec![format!(
            "> {} {}",
            request.method,
            self.redactor.redact(&self.display_url(&request.path))
        )];
        lines.extend(self.redactor.header_lines(">", &request.headers));
        match &request.body {
            RequestBody::Empty => {}
            RequestBody::Bytes(bytes) => {
                lines.push(">".to_string());
                lines.push(format!("> {}", self.excerpt(bytes)));
            }
            RequestBody::Stream { length, .. } => {
                let size = length.map_or_else(|| "unknown size".to_string(), |n| format!("{} bytes", n));
                lines.push(format!("> [streamed body, {}]", size));
            }
        }
        lines
    }

    fn excerpt(&self, bytes: &[u8]) -> String {
        let shown = &bytes[..bytes.len().min(self.excerpt_limit)];
        let mut text = self.redactor.redact(&String::from_utf8_lossy(shown));
        if bytes.len() > self.excerpt_limit {
            text.push_str(&format!(" ... [{} more bytes]", bytes.len() - self.excerpt_limit));
        }
        text
    }

    /// Read up to the excerpt limit from the body, then hand back a stream that replays
    /// what was read ahead of the remainder.
    async fn peek(&self, response: ApiResponse) -> (ApiResponse, Bytes, bool) {
        let limit = self.excerpt_limit;
        let mut peeked: Vec<Result<Bytes, TransportError>> = Vec::new();
        let mut seen = Vec::new();
        let mut more = true;

        let mut body = None;
        let response = response.map_body(|inner| {
            body = Some(inner);
            Box::pin(stream::empty::<Result<Bytes, TransportError>>())
        });
        let Some(mut inner) = body else {
            return (response, Bytes::new(), false);
        };

        while seen.len() < limit {
            match inner.next().await {
                Some(Ok(chunk)) => {
                    seen.extend_from_slice(&chunk);
                    peeked.push(Ok(chunk));
                }
                Some(Err(err)) => {
                    peeked.push(Err(err));
                    more = false;
                    break;
                }
                None => {
                    more = false;
                    break;
                }
            }
        }

        let truncated = more || seen.len() > limit;
        seen.truncate(limit);
        let replay: ResponseStream = Box::pin(stream::iter(peeked).chain(inner));
        (response.map_body(|_| replay), Bytes::from(seen), truncated)
    }
}

#[async_trait]
impl Executor for TraceRecorder {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let started = Instant::now();
        let method = request.method.clone();
        let url = self.redactor.redact(&self.display_url(&request.path));
        let _ = self
            .sink
            .write_lines(self.request_lines(&request).iter().map(String::as_str));

        let response = match self.inner.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                let _ = self.sink.write_line(&format!(
                    "! {} {} failed after {:?}: {}",
                    method,
                    url,
                    started.elapsed(),
                    self.redactor.redact(&err.to_string())
                ));
                return Err(err);
            }
        };

        let mut lines = vec![format!("< {} ({:?})", response.status, started.elapsed())];
        lines.extend(self.redactor.header_lines("<", &response.headers));
        let (response, excerpt, truncated) = self.peek(response).await;
        if !excerpt.is_empty() {
            lines.push("<".to_string());
            let mut text = self.redactor.redact(&String::from_utf8_lossy(&excerpt));
            if truncated {
                text.push_str(" ...");
            }
            lines.push(format!("< {}", text));
        }
        let _ = self.sink.write_lines(lines.iter().map(String::as_str));
        Ok(response)
    }
}
