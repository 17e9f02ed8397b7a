//! Environment source: `OPSPLANE_TARGET`, `OPSPLANE_PASSWORD`, ...

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, Map};

pub const ENV_PREFIX: &str = "OPSPLANE";

/// Add the `OPSPLANE_*` variables to the builder. `vars` replaces the process
/// environment when given.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    vars: Option<Map<String, String>>,
) -> ConfigBuilder<DefaultState> {
    builder.add_source(Environment::with_prefix(ENV_PREFIX).source(vars))
}

/// Variable a user should set instead of writing `key` into a file.
pub fn variable_for(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.to_ascii_uppercase())
}
