//! Env file source: the YAML file passed with `--env`.
//!
//! Keys are kebab-case (`client-secret`, `skip-ssl-validation`) and are normalized to the
//! snake_case keys the rest of the stack uses. Unknown keys are rejected.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat, Map, Source, Value};
use std::path::Path;

/// Keys an env file may set.
pub const KNOWN_KEYS: &[&str] = &[
    "target",
    "username",
    "password",
    "client_id",
    "client_secret",
    "ca_cert",
    "skip_ssl_validation",
    "decryption_passphrase",
    "connect_timeout",
    "request_timeout",
    "trace",
    "decryption_backoff_ms",
    "decryption_max_probes",
    "decryption_timeout",
    "progress_interval_ms",
    "trace_excerpt_bytes",
    "token_refresh_margin_secs",
];

#[derive(Debug, Clone)]
pub struct EnvFileSource {
    origin: String,
    contents: String,
}

impl EnvFileSource {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Message(format!("env file does not exist: {}", e)))?;
        Ok(Self {
            origin: path.display().to_string(),
            contents,
        })
    }

    pub fn from_contents(origin: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            contents: contents.into(),
        }
    }
}

impl Source for EnvFileSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let raw = File::from_str(&self.contents, FileFormat::Yaml)
            .collect()
            .map_err(|e| {
                ConfigError::Message(format!("could not parse env file {}: {}", self.origin, e))
            })?;

        let mut normalized = Map::new();
        for (key, value) in raw {
            let canonical = key.replace('-', "_").to_ascii_lowercase();
            if !KNOWN_KEYS.contains(&canonical.as_str()) {
                return Err(ConfigError::Message(format!(
                    "could not parse env file {}: unknown key {:?}",
                    self.origin, key
                )));
            }
            normalized.insert(canonical, value);
        }
        Ok(normalized)
    }
}

/// Add the env file at `path` to the builder.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(EnvFileSource::read(path)?))
}
