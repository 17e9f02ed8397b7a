//! Decryption gate: holds requests until the controller's data store is unlocked.
//!
//! After a reboot the controller refuses authenticated work until its decryption
//! passphrase is supplied. The gate probes the availability endpoint on the
//! unauthenticated executor, submits the passphrase when the controller reports
//! locked, and polls with a fixed backoff while it is still starting. Once unlocked the
//! gate is a pass-through for the rest of the process.

use crate::error::{Layer, TransportError};
use crate::transport::base::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::message::{ApiRequest, ApiResponse, ERROR_BODY_LIMIT};
use crate::transport::{Executor, SharedExecutor};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Unauthenticated availability probe.
pub const AVAILABILITY_PATH: &str = "/login/ensure_availability";

/// Passphrase submission endpoint.
pub const UNLOCK_PATH: &str = "/api/v0/unlock";

/// Probe body text while the authentication system is still starting.
const BOOTING_MARKER: &str = "Waiting for authentication system to start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionState {
    Unknown,
    Locked,
    Unlocked,
}

/// Polling bounds for the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Pause between probes while the controller is not ready.
    pub backoff: Duration,
    /// Hard cap on probes for one unlock sequence.
    pub max_probes: u32,
    /// Wall-clock budget for one unlock sequence.
    pub deadline: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            max_probes: 600,
            deadline: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Locked,
    Booting,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockOutcome {
    Accepted,
    NotReady,
}

pub struct DecryptionGate {
    inner: SharedExecutor,
    probe: SharedExecutor,
    passphrase: String,
    policy: GatePolicy,
    state: Mutex<DecryptionState>,
    probes: AtomicU32,
}

impl DecryptionGate {
    /// `inner` receives gated requests; `probe` carries availability and unlock traffic
    /// and must not itself be gated.
    pub fn new(inner: SharedExecutor, probe: SharedExecutor, passphrase: impl Into<String>) -> Self {
        Self {
            inner,
            probe,
            passphrase: passphrase.into(),
            policy: GatePolicy::default(),
            state: Mutex::new(DecryptionState::Unknown),
            probes: AtomicU32::new(0),
        }
    }

    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn state(&self) -> DecryptionState {
        *self.state.lock().await
    }

    /// Probes issued over the lifetime of this gate.
    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    async fn ensure_unlocked(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if *state == DecryptionState::Unlocked {
            return Ok(());
        }

        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            if attempts >= self.policy.max_probes {
                return Err(TransportError::DecryptionTimeout {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            attempts += 1;
            self.probes.fetch_add(1, Ordering::SeqCst);

            match self.probe_once().await? {
                ProbeOutcome::Unlocked => {
                    debug!(attempts, "Controller reports unlocked");
                    *state = DecryptionState::Unlocked;
                    return Ok(());
                }
                ProbeOutcome::Locked => {
                    *state = DecryptionState::Locked;
                    info!(attempts, "Controller is locked, submitting decryption passphrase");
                    if self.submit_passphrase().await? == UnlockOutcome::Accepted {
                        info!("Controller unlocked");
                        *state = DecryptionState::Unlocked;
                        return Ok(());
                    }
                    debug!(attempts, "Controller not ready to accept the passphrase");
                }
                ProbeOutcome::Booting => {
                    debug!(attempts, "Controller authentication system still starting");
                }
            }

            let elapsed = started.elapsed();
            if elapsed.saturating_add(self.policy.backoff) > self.policy.deadline {
                return Err(TransportError::DecryptionTimeout { attempts, elapsed });
            }
            sleep(self.policy.backoff).await;
        }
    }

    async fn probe_once(&self) -> Result<ProbeOutcome, TransportError> {
        let response = self
            .probe
            .execute(ApiRequest::get(AVAILABILITY_PATH))
            .await
            .map_err(|e| e.within(Layer::DecryptionGate))?;
        let status = response.status;

        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(ProbeOutcome::Locked);
        }
        if status.is_redirection() {
            return Ok(ProbeOutcome::Unlocked);
        }
        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| e.within(Layer::DecryptionGate))?;
            return Ok(if body.contains(BOOTING_MARKER) {
                ProbeOutcome::Booting
            } else {
                ProbeOutcome::Unlocked
            });
        }
        Err(unexpected(Method::GET, AVAILABILITY_PATH, response).await)
    }

    async fn submit_passphrase(&self) -> Result<UnlockOutcome, TransportError> {
        let request = ApiRequest::put(UNLOCK_PATH)
            .json(&json!({ "passphrase": self.passphrase }))
            .map_err(|e| e.within(Layer::DecryptionGate))?;
        let response = self
            .probe
            .execute(request)
            .await
            .map_err(|e| e.within(Layer::DecryptionGate))?;

        let status = response.status;
        if status.is_success() {
            Ok(UnlockOutcome::Accepted)
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            Ok(UnlockOutcome::NotReady)
        } else {
            let body = response.excerpt(ERROR_BODY_LIMIT).await;
            Err(TransportError::Decryption { status, body })
        }
    }
}

async fn unexpected(method: Method, path: &str, response: ApiResponse) -> TransportError {
    let status = response.status;
    let body = response.excerpt(ERROR_BODY_LIMIT).await;
    TransportError::UnexpectedResponse {
        method,
        path: path.to_string(),
        status,
        body,
    }
    .within(Layer::DecryptionGate)
}

#[async_trait]
impl Executor for DecryptionGate {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.ensure_unlocked().await?;
        self.inner.execute(request).await
    }
}
