//! Pipeline assembly: the named executors commands run against.
//!
//! Layers wrap in a fixed order, outermost first:
//! trace, progress, decryption gate, token authenticator, base executor.
//! All authenticated executors share one [`TokenAuthenticator`] and one
//! [`DecryptionGate`], so token and unlock state are per pipeline.

use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::transport::base::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::transport::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::transport::trace::DEFAULT_EXCERPT_LIMIT;
use crate::transport::{
    BaseExecutor, DecryptionGate, DiagnosticSink, GatePolicy, LiveProgressLine, ProgressDisplay,
    ProgressInstrumentor, SharedExecutor, TokenAuthenticator, TraceRecorder,
    DEFAULT_REFRESH_MARGIN,
};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tunables for pipeline construction.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub connect_timeout: Duration,
    /// Zero disables the request timeout.
    pub request_timeout: Duration,
    pub decryption_passphrase: Option<String>,
    pub trace: bool,
    pub gate: GatePolicy,
    pub progress_interval: Duration,
    pub trace_excerpt_limit: usize,
    pub refresh_margin: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            decryption_passphrase: None,
            trace: false,
            gate: GatePolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            trace_excerpt_limit: DEFAULT_EXCERPT_LIMIT,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field(
                "decryption_passphrase",
                &self.decryption_passphrase.as_ref().map(|_| "[REDACTED]"),
            )
            .field("trace", &self.trace)
            .field("gate", &self.gate)
            .field("progress_interval", &self.progress_interval)
            .field("trace_excerpt_limit", &self.trace_excerpt_limit)
            .field("refresh_margin", &self.refresh_margin)
            .finish()
    }
}

/// The five executors handed to commands.
pub struct Pipeline {
    /// Base executor only; no credentials attached.
    pub unauthenticated: SharedExecutor,
    /// Decryption gate over the token authenticator.
    pub authenticated: SharedExecutor,
    /// Token authenticator without the decryption gate.
    pub authenticated_direct: SharedExecutor,
    pub unauthenticated_progress: SharedExecutor,
    pub authenticated_progress: SharedExecutor,
    target: Url,
    authenticator: Option<Arc<TokenAuthenticator>>,
    gate: Option<Arc<DecryptionGate>>,
}

impl Pipeline {
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Shared token layer; `None` for anonymous pipelines.
    pub fn authenticator(&self) -> Option<&Arc<TokenAuthenticator>> {
        self.authenticator.as_ref()
    }

    /// Shared decryption gate; `None` when no passphrase was configured.
    pub fn gate(&self) -> Option<&Arc<DecryptionGate>> {
        self.gate.as_ref()
    }
}

pub struct PipelineBuilder {
    target: String,
    credentials: CredentialStore,
    options: PipelineOptions,
    sink: Option<DiagnosticSink>,
    display: Option<Arc<dyn ProgressDisplay>>,
}

impl PipelineBuilder {
    pub fn new(
        target: impl Into<String>,
        credentials: CredentialStore,
        options: PipelineOptions,
    ) -> Self {
        Self {
            target: target.into(),
            credentials,
            options,
            sink: None,
            display: None,
        }
    }

    /// Destination for trace lines and the default progress line. Defaults to stderr.
    pub fn with_sink(mut self, sink: DiagnosticSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_progress_display(mut self, display: Arc<dyn ProgressDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn build(self) -> Result<Pipeline, ApiError> {
        let PipelineBuilder {
            target,
            credentials,
            options,
            sink,
            display,
        } = self;
        let sink = sink.unwrap_or_else(DiagnosticSink::stderr);

        let base = BaseExecutor::new(
            &target,
            &credentials.tls,
            options.connect_timeout,
            options.request_timeout,
        )?;
        let target = base.target().clone();
        let base: SharedExecutor = Arc::new(base);

        let authenticator = if credentials.identity.is_anonymous() {
            None
        } else {
            Some(Arc::new(
                TokenAuthenticator::new(base.clone(), credentials.identity.clone())
                    .with_refresh_margin(options.refresh_margin),
            ))
        };
        let authenticated_direct: SharedExecutor = match &authenticator {
            Some(auth) => auth.clone() as SharedExecutor,
            None => base.clone(),
        };

        let passphrase = options
            .decryption_passphrase
            .clone()
            .filter(|p| !p.is_empty());
        let gate = passphrase.as_ref().map(|passphrase| {
            Arc::new(
                DecryptionGate::new(authenticated_direct.clone(), base.clone(), passphrase.clone())
                    .with_policy(options.gate),
            )
        });
        let authenticated: SharedExecutor = match &gate {
            Some(gate) => gate.clone() as SharedExecutor,
            None => authenticated_direct.clone(),
        };

        debug!(
            controller = %target,
            authenticated = authenticator.is_some(),
            decryption_gate = gate.is_some(),
            trace = options.trace,
            "Assembling transport pipeline"
        );

        let display: Arc<dyn ProgressDisplay> =
            display.unwrap_or_else(|| Arc::new(LiveProgressLine::new(sink.clone())));
        let with_progress = |inner: SharedExecutor| -> SharedExecutor {
            Arc::new(
                ProgressInstrumentor::new(inner, display.clone())
                    .with_interval(options.progress_interval),
            )
        };

        let mut secrets = credentials.identity.secrets();
        secrets.extend(passphrase);
        let with_trace = |inner: SharedExecutor| -> SharedExecutor {
            if !options.trace {
                return inner;
            }
            Arc::new(
                TraceRecorder::new(inner, sink.clone())
                    .with_target(target.clone())
                    .with_secrets(secrets.clone())
                    .with_excerpt_limit(options.trace_excerpt_limit),
            )
        };

        Ok(Pipeline {
            unauthenticated: with_trace(base.clone()),
            authenticated: with_trace(authenticated.clone()),
            authenticated_direct: with_trace(authenticated_direct),
            unauthenticated_progress: with_trace(with_progress(base)),
            authenticated_progress: with_trace(with_progress(authenticated)),
            target: target.clone(),
            authenticator,
            gate,
        })
    }
}
