//! Token authenticator: obtains an OAuth bearer token and attaches it to every request.
//!
//! The token slot is an async mutex held across the token call, so overlapping requests
//! that find the token missing or stale wait on one refresh instead of each issuing
//! their own. Token endpoint rejections surface immediately and are never retried.

use crate::credentials::{Identity, PUBLIC_CLIENT_ID};
use crate::error::{Layer, TransportError};
use crate::transport::message::{ApiRequest, ApiResponse, ERROR_BODY_LIMIT};
use crate::transport::{Executor, SharedExecutor};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// OAuth token endpoint on the controller.
pub const TOKEN_PATH: &str = "/uaa/oauth/token";

/// A token this close to expiry is refreshed before use.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5);

/// Lifetime assumed when the token endpoint omits `expires_in` (the UAA default).
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Least time a just-fetched token is considered valid for the request that fetched it.
const MIN_TOKEN_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Token {
    pub access_token: String,
    pub expires_at: Instant,
}

impl Token {
    /// Usable at `now` with at least `margin` to spare.
    pub fn is_fresh(&self, now: Instant, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct TokenAuthenticator {
    inner: SharedExecutor,
    identity: Identity,
    refresh_margin: Duration,
    token: Mutex<Option<Token>>,
}

impl TokenAuthenticator {
    pub fn new(inner: SharedExecutor, identity: Identity) -> Self {
        Self {
            inner,
            identity,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            token: Mutex::new(None),
        }
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Current access token, refreshing it first when absent or near expiry.
    pub async fn bearer_token(&self) -> Result<String, TransportError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.is_fresh(Instant::now(), self.refresh_margin) {
                return Ok(token.access_token.clone());
            }
            debug!("Access token near expiry, refreshing");
        }
        let token = self.fetch_token().await?;
        let access_token = token.access_token.clone();
        *slot = Some(token);
        Ok(access_token)
    }

    fn token_request(&self) -> Result<ApiRequest, TransportError> {
        let (client_id, client_secret, fields) = match &self.identity {
            Identity::Password { username, password } => (
                PUBLIC_CLIENT_ID,
                "",
                vec![
                    ("grant_type", "password"),
                    ("username", username.as_str()),
                    ("password", password.as_str()),
                ],
            ),
            Identity::ClientCredentials {
                client_id,
                client_secret,
            } => (
                client_id.as_str(),
                client_secret.as_str(),
                vec![("grant_type", "client_credentials")],
            ),
            Identity::Anonymous => {
                return Err(TransportError::InvalidRequest(
                    "no credentials configured for an authenticated request".to_string(),
                )
                .within(Layer::TokenAuthenticator))
            }
        };

        let basic = STANDARD.encode(format!("{}:{}", client_id, client_secret));
        let mut authorization = HeaderValue::from_str(&format!("Basic {}", basic))
            .map_err(|e| {
                TransportError::InvalidRequest(format!("client credentials: {}", e))
                    .within(Layer::TokenAuthenticator)
            })?;
        authorization.set_sensitive(true);

        Ok(ApiRequest::post(TOKEN_PATH)
            .form(&fields)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, HeaderValue::from_static("application/json")))
    }

    async fn fetch_token(&self) -> Result<Token, TransportError> {
        let request = self.token_request()?;
        let requested_at = Instant::now();
        let response = self
            .inner
            .execute(request)
            .await
            .map_err(|e| e.within(Layer::TokenAuthenticator))?;

        if !response.is_success() {
            let status = response.status;
            let body = response.excerpt(ERROR_BODY_LIMIT).await;
            return Err(TransportError::Authentication { status, body });
        }

        let parsed = parse_token_response(response).await?;
        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        info!(expires_in_secs = lifetime.as_secs(), "Obtained access token");

        // Expiry counts from before the call so the recorded deadline is never late.
        let mut expires_at = requested_at + lifetime;
        if lifetime <= self.refresh_margin {
            warn!(
                expires_in_secs = lifetime.as_secs(),
                refresh_margin_secs = self.refresh_margin.as_secs(),
                "Access token lifetime is within the refresh margin, using it for one request"
            );
            // Never fresh for a later caller, but still unexpired when this request is sent.
            let floor = Instant::now() + self.refresh_margin.max(MIN_TOKEN_WINDOW);
            expires_at = expires_at.max(floor);
        }
        Ok(Token {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}

async fn parse_token_response(response: ApiResponse) -> Result<TokenResponse, TransportError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| e.within(Layer::TokenAuthenticator))?;
    let parsed: TokenResponse = serde_json::from_slice(&bytes)
        .map_err(|e| TransportError::MalformedToken(e.to_string()))?;
    if parsed.access_token.is_empty() {
        return Err(TransportError::MalformedToken(
            "empty access_token".to_string(),
        ));
    }
    Ok(parsed)
}

#[async_trait]
impl Executor for TokenAuthenticator {
    async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let token = self.bearer_token().await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TransportError::MalformedToken(format!("access token: {}", e)))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        self.inner.execute(request).await
    }
}
