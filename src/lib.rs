//! opsplane: authenticated client for a controller management plane
//!
//! Every command runs over one transport pipeline: a chain of executors that adds
//! bearer tokens, waits out a locked controller after a reboot, reports transfer
//! progress, and traces exchanges with secrets masked.

pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod transport;
