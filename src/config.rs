//! Configuration System
//!
//! Connection settings are layered with the `config` crate, lowest precedence first:
//! built-in defaults, the `--env` YAML file, `OPSPLANE_*` environment variables, then
//! command-line flags. The resolved settings feed the credential store and the pipeline.

use crate::credentials::{CredentialStore, Identity, TlsTrust};
use crate::error::ApiError;
use crate::pipeline::PipelineOptions;
use crate::transport::GatePolicy;
use config::builder::DefaultState;
use config::{ConfigBuilder, Map};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

mod merge;
mod sources;

pub use sources::env_file::{EnvFileSource, KNOWN_KEYS};
pub use sources::environment::ENV_PREFIX;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\(.*\)\)").unwrap_or_else(|_| unreachable!()));

/// Connection settings after layering.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// PEM content or a path to a PEM file
    #[serde(default)]
    pub ca_cert: Option<String>,
    pub skip_ssl_validation: bool,
    #[serde(default)]
    pub decryption_passphrase: Option<String>,
    /// Seconds
    pub connect_timeout: u64,
    /// Seconds; 0 disables the timeout
    pub request_timeout: u64,
    pub trace: bool,
    pub decryption_backoff_ms: u64,
    pub decryption_max_probes: u32,
    /// Seconds; defaults to the request timeout
    #[serde(default)]
    pub decryption_timeout: Option<u64>,
    pub progress_interval_ms: u64,
    pub trace_excerpt_bytes: usize,
    pub token_refresh_margin_secs: u64,
}

impl ConnectionSettings {
    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(
            Identity::from_parts(
                self.username.as_deref(),
                self.password.as_deref(),
                self.client_id.as_deref(),
                self.client_secret.as_deref(),
            ),
            TlsTrust {
                ca_cert: self.ca_cert.clone(),
                skip_validation: self.skip_ssl_validation,
            },
        )
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let request_timeout = Duration::from_secs(self.request_timeout);
        let deadline = match self.decryption_timeout {
            Some(secs) => Duration::from_secs(secs),
            None if request_timeout.is_zero() => Duration::MAX,
            None => request_timeout,
        };
        PipelineOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout,
            decryption_passphrase: self.decryption_passphrase.clone(),
            trace: self.trace,
            gate: GatePolicy {
                backoff: Duration::from_millis(self.decryption_backoff_ms),
                max_probes: self.decryption_max_probes,
                deadline,
            },
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            trace_excerpt_limit: self.trace_excerpt_bytes,
            refresh_margin: Duration::from_secs(self.token_refresh_margin_secs),
        }
    }

    /// The configured target, or a configuration error naming how to set it.
    pub fn require_target(&self) -> Result<&str, ApiError> {
        self.target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::ConfigError(format!(
                    "target is required (use --target, {}_TARGET, or the env file)",
                    ENV_PREFIX
                ))
            })
    }

    /// Reject `((placeholder))` values that only make sense to a template interpolator.
    fn check_for_placeholders(&self) -> Result<(), ApiError> {
        let fields = [
            ("decryption_passphrase", &self.decryption_passphrase),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("password", &self.password),
            ("target", &self.target),
            ("username", &self.username),
        ];
        let problems: Vec<String> = fields
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(false, |v| PLACEHOLDER.is_match(v)))
            .map(|(key, _)| {
                format!(
                    "* use {} environment variable for the {} value",
                    sources::environment::variable_for(key),
                    key.replace('_', "-")
                )
            })
            .collect();

        if problems.is_empty() {
            return Ok(());
        }
        let mut message = vec![
            "found problem in --env file: env file contains YAML placeholders. \
             Please provide them via environment variables."
                .to_string(),
        ];
        message.extend(problems);
        Err(ApiError::ConfigError(message.join("\n")))
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ConnectionSettings")
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "[set]"))
            .field("skip_ssl_validation", &self.skip_ssl_validation)
            .field("decryption_passphrase", &redacted(&self.decryption_passphrase))
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

/// Values given on the command line. `None` leaves lower layers untouched.
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub target: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub ca_cert: Option<String>,
    pub skip_ssl_validation: Option<bool>,
    pub decryption_passphrase: Option<String>,
    pub connect_timeout: Option<u64>,
    pub request_timeout: Option<u64>,
    pub trace: Option<bool>,
}

impl ConfigOverrides {
    fn apply(
        &self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        builder
            .set_override_option("target", self.target.clone())?
            .set_override_option("username", self.username.clone())?
            .set_override_option("password", self.password.clone())?
            .set_override_option("client_id", self.client_id.clone())?
            .set_override_option("client_secret", self.client_secret.clone())?
            .set_override_option("ca_cert", self.ca_cert.clone())?
            .set_override_option("skip_ssl_validation", self.skip_ssl_validation)?
            .set_override_option("decryption_passphrase", self.decryption_passphrase.clone())?
            .set_override_option("connect_timeout", self.connect_timeout)?
            .set_override_option("request_timeout", self.request_timeout)?
            .set_override_option("trace", self.trace)
    }
}

/// Resolves [`ConnectionSettings`] from the configured layers.
#[derive(Default)]
pub struct ConfigLoader {
    env_file: Option<PathBuf>,
    environment: Option<Map<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env_file(mut self, path: impl AsRef<Path>) -> Self {
        self.env_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read `OPSPLANE_*` variables from `vars` instead of the process environment.
    pub fn with_environment(mut self, vars: Map<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    pub fn load(&self, overrides: &ConfigOverrides) -> Result<ConnectionSettings, ApiError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        if let Some(path) = &self.env_file {
            debug!(env_file = %path.display(), "Loading env file");
            builder = sources::env_file::add_to_builder(builder, path)?;
        }
        builder = sources::environment::add_to_builder(builder, self.environment.clone());
        builder = overrides.apply(builder)?;

        let settings: ConnectionSettings = builder.build()?.try_deserialize()?;
        if self.env_file.is_some() {
            settings.check_for_placeholders()?;
        }
        debug!(settings = ?settings, "Resolved connection settings");
        Ok(settings)
    }
}
