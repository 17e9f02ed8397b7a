//! Error types for the opsplane controller client.

use reqwest::{Method, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline layer that originated a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    BaseExecutor,
    TokenAuthenticator,
    DecryptionGate,
    ProgressInstrumentor,
    TraceRecorder,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::BaseExecutor => "base executor",
            Layer::TokenAuthenticator => "token authenticator",
            Layer::DecryptionGate => "decryption gate",
            Layer::ProgressInstrumentor => "progress instrumentor",
            Layer::TraceRecorder => "trace recorder",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport pipeline errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("body stream failed: {0}")]
    Body(String),

    #[error("token authenticator: token endpoint returned {status}{}", body_suffix(.body))]
    Authentication { status: StatusCode, body: String },

    #[error("token authenticator: malformed token response: {0}")]
    MalformedToken(String),

    #[error("decryption gate: passphrase rejected with {status}{}", body_suffix(.body))]
    Decryption { status: StatusCode, body: String },

    #[error("decryption gate: still locked after {attempts} attempts ({elapsed:?})")]
    DecryptionTimeout { attempts: u32, elapsed: Duration },

    #[error("unexpected response from {path} ({method}): {status}{}", body_suffix(.body))]
    UnexpectedResponse {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },

    /// A failure of traffic issued by a layer on its own account (token calls, unlock
    /// probes). The inner error is kept intact for matching through [`TransportError::root`].
    #[error("{layer}: {inner}")]
    Layered {
        layer: Layer,
        inner: Box<TransportError>,
    },
}

fn body_suffix(body: &str) -> String {
    if body.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", body.trim())
    }
}

impl TransportError {
    /// Attribute this error to the layer whose own traffic produced it.
    pub fn within(self, layer: Layer) -> Self {
        TransportError::Layered {
            layer,
            inner: Box::new(self),
        }
    }

    /// Innermost error, skipping layer attribution.
    pub fn root(&self) -> &TransportError {
        match self {
            TransportError::Layered { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// Layer that failed, if the error names one.
    pub fn layer(&self) -> Option<Layer> {
        match self {
            TransportError::Layered { layer, .. } => Some(*layer),
            TransportError::Authentication { .. } | TransportError::MalformedToken(_) => {
                Some(Layer::TokenAuthenticator)
            }
            TransportError::Decryption { .. } | TransportError::DecryptionTimeout { .. } => {
                Some(Layer::DecryptionGate)
            }
            TransportError::Connection(_) | TransportError::Timeout(_) => {
                Some(Layer::BaseExecutor)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), TransportError::Timeout(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(
            self.root(),
            TransportError::Authentication { .. } | TransportError::MalformedToken(_)
        )
    }

    /// Status carried by response-derived errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self.root() {
            TransportError::Authentication { status, .. }
            | TransportError::Decryption { status, .. }
            | TransportError::UnexpectedResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Command and configuration errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
