//! Parsing of script output into a token response.
//!
//! The script's stdout contract: zero or more free-text diagnostic lines
//! followed by exactly one trailing line holding a JSON object with at
//! least a `poToken` field. The payload is only trusted on exit code 0,
//! which the caller enforces before invoking this parser.

use crate::error::ProviderError;

/// A successfully generated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    /// The PO token value.
    pub token: String,
}

/// Parse captured stdout from a zero-exit execute invocation.
///
/// The trailing non-blank line is the JSON payload; earlier lines are
/// diagnostics and are not interpreted here. A line that is not valid JSON
/// is a [`ProviderError::ResponseParse`]; a JSON object without a string
/// `poToken` field is a [`ProviderError::ResponseSchema`].
pub fn parse(stdout: &str) -> Result<TokenResponse, ProviderError> {
    let payload = payload_line(stdout);

    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|source| ProviderError::ResponseParse {
            line: payload.to_string(),
            source,
        })?;

    match value.get("poToken").and_then(|token| token.as_str()) {
        Some(token) => Ok(TokenResponse {
            token: token.to_string(),
        }),
        None => Err(ProviderError::ResponseSchema),
    }
}

/// The trailing non-blank line of stdout (the JSON payload).
pub fn payload_line(stdout: &str) -> &str {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

/// The diagnostic lines preceding the payload, for log surfacing.
pub fn diagnostic_lines(stdout: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = stdout.lines().collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.pop();
    lines
}
