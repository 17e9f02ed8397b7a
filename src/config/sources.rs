//! Configuration sources, lowest precedence first: env file, environment variables.

pub mod env_file;
pub mod environment;
