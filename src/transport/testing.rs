//! Stub executor for layer tests.

use crate::error::TransportError;
use crate::transport::message::{ApiRequest, ApiResponse};
use crate::transport::Executor;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

type Handler =
    Box<dyn Fn(&RecordedRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync>;

/// Drains request bodies like a network would, records each call, and answers through
/// the handler. The handler also receives the number of earlier calls to the same path.
pub(crate) struct StubExecutor {
    handler: Handler,
    calls: Mutex<Vec<RecordedRequest>>,
    delays: Vec<(String, Duration)>,
}

impl StubExecutor {
    pub fn new(
        handler: impl Fn(&RecordedRequest, usize) -> Result<ApiResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delays: Vec::new(),
        }
    }

    /// Sleep before answering requests to `path`.
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.push((path.to_string(), delay));
        self
    }

    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.path == path).count()
    }
}

#[async_trait]
impl Executor for StubExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let ApiRequest {
            method,
            path,
            headers,
            body,
        } = request;
        let body = match body.into_stream() {
            Some((stream, _)) => {
                let chunks: Vec<Bytes> = stream
                    .try_collect()
                    .await
                    .map_err(|e| TransportError::Body(e.to_string()))?;
                Bytes::from(chunks.concat())
            }
            None => Bytes::new(),
        };
        let recorded = RecordedRequest {
            method,
            path,
            headers,
            body,
        };
        let previous = {
            let mut calls = self.calls.lock();
            let previous = calls.iter().filter(|c| c.path == recorded.path).count();
            calls.push(recorded.clone());
            previous
        };
        if let Some((_, delay)) = self.delays.iter().find(|(p, _)| *p == recorded.path) {
            tokio::time::sleep(*delay).await;
        }
        (self.handler)(&recorded, previous)
    }
}
