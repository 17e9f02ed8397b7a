//! CLI output: error mapping from domain errors to stable CLI surface.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Render an error with its full context chain on one line.
pub fn map_error(e: &anyhow::Error) -> String {
    format!("{:#}", e)
}

/// Status and header block curl prints to stderr.
pub fn format_response_head(status: StatusCode, headers: &HeaderMap) -> String {
    let mut lines = vec![format!("Status: {}", status)];
    for (name, value) in headers {
        lines.push(format!(
            "{}: {}",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    lines.join("\n")
}
