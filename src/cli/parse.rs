//! CLI parse: clap types for opsplane. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// opsplane - authenticated client for a controller management plane
#[derive(Parser)]
#[command(name = "opsplane")]
#[command(about = "Authenticated command-line client for a controller management plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Controller URL; https:// is assumed when no scheme is given
    #[arg(long, short = 't')]
    pub target: Option<String>,

    /// Username for the password grant
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Password for the password grant
    #[arg(long, short = 'p')]
    pub password: Option<String>,

    /// Client id for the client-credentials grant (takes precedence over username)
    #[arg(long, short = 'c')]
    pub client_id: Option<String>,

    /// Client secret for the client-credentials grant
    #[arg(long, short = 's')]
    pub client_secret: Option<String>,

    /// CA certificate: PEM content or a path to a PEM file
    #[arg(long)]
    pub ca_cert: Option<String>,

    /// Skip TLS certificate validation
    #[arg(long, short = 'k')]
    pub skip_ssl_validation: bool,

    /// Passphrase to unlock the controller after a reboot
    #[arg(long, short = 'd')]
    pub decryption_passphrase: Option<String>,

    /// Connect timeout in seconds (default: 10)
    #[arg(long, short = 'o')]
    pub connect_timeout: Option<u64>,

    /// Request timeout in seconds, 0 for none (default: 1800)
    #[arg(long, short = 'r')]
    pub request_timeout: Option<u64>,

    /// Print a redacted transcript of every request to stderr
    #[arg(long)]
    pub trace: bool,

    /// YAML env file with connection settings
    #[arg(long, short = 'e')]
    pub env: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Issue an authenticated request to any controller endpoint
    Curl {
        /// Endpoint path, e.g. /api/v0/staged/products
        #[arg(long, short = 'p')]
        path: String,
        /// HTTP method
        #[arg(long, short = 'x', default_value = "GET")]
        request: String,
        /// Request body
        #[arg(long, short = 'd', conflicts_with = "input_file")]
        data: Option<String>,
        /// Stream the request body from a file
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Write the response body to a file instead of stdout
        #[arg(long)]
        output_file: Option<PathBuf>,
        /// Extra request header, "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        /// Do not print the response status and headers
        #[arg(long, short = 's')]
        silent: bool,
    },
    /// Revert all staged changes on the controller
    RevertStagedChanges,
    /// Print the opsplane version
    Version,
}
