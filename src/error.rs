//! Error types for the token-generation path.
//!
//! Availability-path failures (runtime missing, version too low, script not
//! found) are deliberately absent here: they are absorbed into a `false`
//! availability result plus a tracing diagnostic, never surfaced as errors.

use std::io;

use thiserror::Error;

/// Error produced while generating a token through the external script.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The variant was used without a resolvable runtime or script.
    #[error("script runtime variant is not available")]
    Unavailable,

    /// The child process exceeded its wall-clock timeout and was killed.
    #[error("script invocation timed out after {seconds} seconds")]
    InvocationTimeout { seconds: u64 },

    /// The child process could not be spawned at all.
    #[error("failed to spawn `{program}` (caused by: {source})")]
    SpawnFailure {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The script exited with a nonzero status; stdout is never trusted.
    #[error("script exited with status {code:?}\nstderr:\n{stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// The trailing stdout line was not a valid JSON object.
    #[error("error parsing JSON response line `{line}` (caused by: {source})")]
    ResponseParse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The JSON payload decoded but carried no `poToken` field.
    #[error("the script did not respond with a poToken")]
    ResponseSchema,
}
