//! Integration tests for the opsplane transport pipeline and commands

mod config_integration;
mod decryption_gate;
mod pipeline_scenarios;
mod token_refresh;
