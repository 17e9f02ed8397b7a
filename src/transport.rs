//! Transport pipeline
//!
//! Every controller call goes through an [`Executor`]. The pipeline is a chain of
//! decorators around a [`BaseExecutor`], each adding one concern: bearer tokens,
//! the post-reboot decryption gate, transfer progress, and request tracing.
//! Layers are composed by value at construction time and each can be exercised in
//! isolation with a stub inner executor.

use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;

pub mod auth;
pub mod base;
pub mod decrypt;
pub mod message;
pub mod progress;
pub mod sink;
#[cfg(test)]
pub(crate) mod testing;
pub mod trace;

pub use auth::{Token, TokenAuthenticator, DEFAULT_REFRESH_MARGIN, TOKEN_PATH};
pub use base::BaseExecutor;
pub use decrypt::{DecryptionGate, DecryptionState, GatePolicy, AVAILABILITY_PATH, UNLOCK_PATH};
pub use message::{
    ApiRequest, ApiResponse, RequestBody, RequestStream, ResponseStream, BODY_CHUNK_SIZE,
    ERROR_BODY_LIMIT,
};
pub use progress::{
    LiveProgressLine, ProgressDisplay, ProgressInstrumentor, ProgressSnapshot, TransferPhase,
    TransferProgress, DEFAULT_PROGRESS_INTERVAL,
};
pub use sink::{CaptureBuffer, DiagnosticSink};
pub use trace::TraceRecorder;

/// The single capability every command depends on: send a request, get a response or a
/// typed failure. Non-2xx statuses are responses, not errors; callers decide which
/// statuses they expect.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Shared handle to a composed executor.
pub type SharedExecutor = Arc<dyn Executor>;

#[async_trait]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        (**self).execute(request).await
    }
}
