//! Merge rules: defaults at the bottom of the stack.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the default connection settings applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("connect_timeout", 10)?
        .set_default("request_timeout", 1800)?
        .set_default("skip_ssl_validation", false)?
        .set_default("trace", false)?
        .set_default("decryption_backoff_ms", 1000)?
        .set_default("decryption_max_probes", 600)?
        .set_default("progress_interval_ms", 200)?
        .set_default("trace_excerpt_bytes", 1024)?
        .set_default("token_refresh_margin_secs", 5)
}
