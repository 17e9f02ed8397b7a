//! Controller commands built on the transport pipeline.
//!
//! Commands take a finished executor and decide which statuses they accept; they never
//! see the layers behind it.

use crate::error::{ApiError, TransportError};
use crate::transport::{ApiRequest, ApiResponse, Executor, RequestStream, BODY_CHUNK_SIZE};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::{debug, info};

pub const STAGED_PATH: &str = "/api/v0/staged";

pub struct ControllerCommandService;

/// Result of revert-staged-changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted,
    NoChanges,
}

impl RevertOutcome {
    pub fn message(self) -> &'static str {
        match self {
            RevertOutcome::Reverted => "Changes Reverted.",
            RevertOutcome::NoChanges => "No changes to revert.",
        }
    }
}

/// Body source for curl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurlBody {
    None,
    Data(String),
    /// Streamed from disk with progress.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CurlRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<String>,
    pub body: CurlBody,
}

/// Result of curl. The body has been written to stdout or the output file.
#[derive(Debug, Clone)]
pub struct CurlResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes_written: u64,
}

impl ControllerCommandService {
    /// `DELETE /api/v0/staged`. 200 means reverted, 304 means nothing was staged.
    pub async fn revert_staged_changes(
        executor: &dyn Executor,
    ) -> Result<RevertOutcome, TransportError> {
        let response = executor
            .execute(ApiRequest::delete(STAGED_PATH))
            .await?
            .expect_status(
                &Method::DELETE,
                STAGED_PATH,
                &[StatusCode::OK, StatusCode::NOT_MODIFIED],
            )
            .await?;
        let outcome = if response.is_not_modified() {
            RevertOutcome::NoChanges
        } else {
            RevertOutcome::Reverted
        };
        info!(outcome = ?outcome, "Reverted staged changes");
        Ok(outcome)
    }

    /// Build the request for curl from its flags. `-H` values are `Name: value`.
    pub async fn curl_request(request: CurlRequest) -> Result<ApiRequest, ApiError> {
        let mut api_request = ApiRequest::new(request.method, request.path);
        for header in &request.headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                ApiError::ConfigError(format!(
                    "header {:?} must have the form \"Name: value\"",
                    header
                ))
            })?;
            api_request = api_request
                .try_header(name.trim(), value.trim())
                .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        }

        match request.body {
            CurlBody::None => {}
            CurlBody::Data(data) => {
                if !api_request.headers.contains_key(CONTENT_TYPE) {
                    api_request = api_request
                        .try_header(CONTENT_TYPE.as_str(), "application/json")
                        .map_err(|e| ApiError::ConfigError(e.to_string()))?;
                }
                api_request = api_request.bytes_body(data);
            }
            CurlBody::File(path) => {
                let (stream, length) = file_stream(&path).await?;
                api_request = api_request.stream_body(stream, Some(length));
            }
        }
        Ok(api_request)
    }

    /// Execute a curl request and copy the response body to `output` (stdout when
    /// `None`).
    pub async fn curl(
        executor: &dyn Executor,
        request: ApiRequest,
        output: Option<&Path>,
    ) -> Result<CurlResult, ApiError> {
        debug!(method = %request.method, path = %request.path, "curl");
        let response = executor.execute(request).await?;
        let status = response.status;
        let headers = response.headers.clone();

        let bytes_written = match output {
            Some(path) => {
                let mut file = tokio::fs::File::create(path).await?;
                let written = copy_body(response, &mut file).await?;
                file.flush().await?;
                written
            }
            None => {
                let mut stdout = tokio::io::stdout();
                let written = copy_body(response, &mut stdout).await?;
                stdout.flush().await?;
                written
            }
        };

        Ok(CurlResult {
            status,
            headers,
            bytes_written,
        })
    }
}

async fn copy_body<W>(response: ApiResponse, writer: &mut W) -> Result<u64, ApiError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut body = response.into_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Reads a file in fixed-size chunks without blocking the runtime.
struct FileChunks {
    file: tokio::fs::File,
    done: bool,
}

impl Stream for FileChunks {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let mut chunk = vec![0u8; BODY_CHUNK_SIZE];
        let mut buf = ReadBuf::new(&mut chunk);
        match Pin::new(&mut this.file).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len();
                if n == 0 {
                    this.done = true;
                    return Poll::Ready(None);
                }
                chunk.truncate(n);
                Poll::Ready(Some(Ok(Bytes::from(chunk))))
            }
        }
    }
}

async fn file_stream(path: &Path) -> Result<(RequestStream, u64), ApiError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        ApiError::ConfigError(format!("could not open {}: {}", path.display(), e))
    })?;
    let length = file.metadata().await?.len();
    Ok((Box::pin(FileChunks { file, done: false }), length))
}
