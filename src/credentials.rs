//! Credential store: identity material and TLS trust for the controller.
//!
//! Immutable for the lifetime of the process. Secrets never appear in `Debug` output.

use crate::error::ApiError;
use std::fmt;
use std::path::Path;

/// Client id used for the password grant, as registered by the controller's UAA.
pub const PUBLIC_CLIENT_ID: &str = "opsman";

/// Who the pipeline authenticates as.
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credentials: only unauthenticated commands can run.
    Anonymous,
    Password { username: String, password: String },
    ClientCredentials { client_id: String, client_secret: String },
}

impl Identity {
    /// Pick the grant from whichever credentials were supplied. A client id wins over a
    /// username when both are present.
    pub fn from_parts(
        username: Option<&str>,
        password: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Self {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }
        if let Some(client_id) = present(client_id) {
            return Identity::ClientCredentials {
                client_id: client_id.to_string(),
                client_secret: client_secret.unwrap_or_default().to_string(),
            };
        }
        if let Some(username) = present(username) {
            return Identity::Password {
                username: username.to_string(),
                password: password.unwrap_or_default().to_string(),
            };
        }
        Identity::Anonymous
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// Secret values that diagnostic output must never show.
    pub fn secrets(&self) -> Vec<String> {
        match self {
            Identity::Anonymous => Vec::new(),
            Identity::Password { password, .. } => vec![password.clone()],
            Identity::ClientCredentials { client_secret, .. } => vec![client_secret.clone()],
        }
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("Anonymous"),
            Identity::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Identity::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
        }
    }
}

/// TLS trust configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsTrust {
    /// CA certificate, either PEM content or a path to a PEM file.
    pub ca_cert: Option<String>,
    pub skip_validation: bool,
}

impl TlsTrust {
    /// Resolve the CA certificate into PEM bytes.
    pub fn ca_pem(&self) -> Result<Option<Vec<u8>>, ApiError> {
        let Some(ca_cert) = self.ca_cert.as_deref().map(str::trim).filter(|c| !c.is_empty())
        else {
            return Ok(None);
        };
        if ca_cert.contains("-----BEGIN") {
            return Ok(Some(ca_cert.as_bytes().to_vec()));
        }
        let path = Path::new(ca_cert);
        std::fs::read(path).map(Some).map_err(|e| {
            ApiError::ConfigError(format!(
                "could not read CA certificate {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Static identity and trust material for one process invocation.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    pub identity: Identity,
    pub tls: TlsTrust,
}

impl CredentialStore {
    pub fn new(identity: Identity, tls: TlsTrust) -> Self {
        Self { identity, tls }
    }

    pub fn anonymous() -> Self {
        Self::new(Identity::Anonymous, TlsTrust::default())
    }
}
