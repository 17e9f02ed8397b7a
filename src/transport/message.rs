//! Request and response values that travel through the executor chain.

use crate::error::TransportError;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::pin::Pin;

/// Outgoing body stream. `Sync` because the base executor hands it to the HTTP client.
pub type RequestStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Incoming body stream.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Chunk size used when an in-memory body is streamed for progress tracking.
pub const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on response bytes captured into error values.
pub const ERROR_BODY_LIMIT: usize = 4096;

pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Stream {
        stream: RequestStream,
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Length known up front, either from the buffer or declared by the producer.
    pub fn declared_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Convert into a chunked stream. Empty bodies have no stream.
    pub fn into_stream(self) -> Option<(RequestStream, Option<u64>)> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Bytes(bytes) => {
                let length = bytes.len() as u64;
                Some((chunked(bytes), Some(length)))
            }
            RequestBody::Stream { stream, length } => Some((stream, length)),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            RequestBody::Stream { length, .. } => write!(f, "Stream(length: {:?})", length),
        }
    }
}

fn chunked(bytes: Bytes) -> RequestStream {
    let len = bytes.len();
    let chunks: Vec<io::Result<Bytes>> = (0..len)
        .step_by(BODY_CHUNK_SIZE)
        .map(|start| Ok(bytes.slice(start..(start + BODY_CHUNK_SIZE).min(len))))
        .collect();
    Box::pin(stream::iter(chunks))
}

/// A request addressed relative to the controller target.
#[derive(Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the target, or an absolute URL.
    pub path: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from raw strings, as typed on a command line.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, TransportError> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| TransportError::InvalidRequest(format!("header value for {}: {}", name, e)))?;
        Ok(self.header(name, value))
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| TransportError::InvalidRequest(format!("JSON body: {}", e)))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = RequestBody::Bytes(Bytes::from(body));
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.body = RequestBody::Bytes(Bytes::from(encoded));
        self
    }

    pub fn bytes_body(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(bytes.into());
        self
    }

    pub fn stream_body(mut self, stream: RequestStream, length: Option<u64>) -> Self {
        self.body = RequestBody::Stream { stream, length };
        self
    }
}

/// A controller response. The body is streamed; consume it with one of the readers.
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    body: ResponseStream,
}

impl ApiResponse {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        content_length: Option<u64>,
        body: ResponseStream,
    ) -> Self {
        Self {
            status,
            headers,
            content_length,
            body,
        }
    }

    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let length = body.len() as u64;
        let stream: ResponseStream = if body.is_empty() {
            Box::pin(stream::empty::<Result<Bytes, TransportError>>())
        } else {
            Box::pin(stream::once(async move { Ok::<_, TransportError>(body) }))
        };
        Self::new(status, HeaderMap::new(), Some(length), stream)
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::from_bytes(status, Bytes::new())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 304: the controller had nothing to change.
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Replace the body stream, keeping status and headers.
    pub fn map_body(self, f: impl FnOnce(ResponseStream) -> ResponseStream) -> Self {
        Self {
            status: self.status,
            headers: self.headers,
            content_length: self.content_length,
            body: f(self.body),
        }
    }

    pub fn into_stream(self) -> ResponseStream {
        self.body
    }

    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let mut body = self.body;
        // Content-Length is server input; only trust it as a small hint.
        let hint = self.content_length.unwrap_or(0).min(ERROR_BODY_LIMIT as u64) as usize;
        let mut buf = Vec::with_capacity(hint);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }

    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::Body(format!("invalid JSON response: {}", e)))
    }

    /// Read at most `limit` bytes of the body as lossy text. Read failures yield what was
    /// collected so far; the excerpt only decorates an error that is already being raised.
    pub async fn excerpt(self, limit: usize) -> String {
        let mut body = self.body;
        let mut buf = Vec::new();
        while buf.len() < limit {
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                _ => break,
            }
        }
        buf.truncate(limit);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Pass the response through when its status is one the caller expects; otherwise
    /// fail with [`TransportError::UnexpectedResponse`].
    pub async fn expect_status(
        self,
        method: &Method,
        path: &str,
        expected: &[StatusCode],
    ) -> Result<Self, TransportError> {
        if expected.contains(&self.status) {
            return Ok(self);
        }
        let status = self.status;
        let body = self.excerpt(ERROR_BODY_LIMIT).await;
        Err(TransportError::UnexpectedResponse {
            method: method.clone(),
            path: path.to_string(),
            status,
            body,
        })
    }
}

impl fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
