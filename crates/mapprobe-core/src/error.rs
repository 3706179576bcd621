//! Error taxonomy shared by the poller and the endpoint probe.

use std::time::Duration;

/// Boxed error returned by caller-supplied predicates and accessors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Maximum number of body bytes kept in error messages.
const MAX_BODY_PREVIEW: usize = 512;

/// Errors produced while waiting for a condition or probing an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("timed out after {elapsed:?} waiting for {target} (last observed: {last_observed})")]
    Timeout {
        target: String,
        elapsed: Duration,
        last_observed: String,
    },

    #[error("checking {target} failed after {elapsed:?}: {source}")]
    Predicate {
        target: String,
        elapsed: Duration,
        #[source]
        source: BoxError,
    },

    #[error("could not connect to {target} after {attempts} attempt(s) in {elapsed:?}: {reason}")]
    Dial {
        target: String,
        attempts: u32,
        elapsed: Duration,
        reason: String,
    },

    #[error(
        "{target} never returned a matching response after {attempts} attempt(s) in {elapsed:?} \
         (last error: {last_error}; last body: {last_body:?})"
    )]
    EndpointUnavailable {
        target: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
        last_body: String,
    },

    #[error("{target}: cancelled after {elapsed:?}")]
    Cancelled { target: String, elapsed: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error came from a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Whether the deadline expired before the condition held.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result type for mapprobe core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Render a response body for diagnostics: lossy UTF-8, truncated.
pub fn body_preview(body: &[u8]) -> String {
    if body.len() <= MAX_BODY_PREVIEW {
        return String::from_utf8_lossy(body).into_owned();
    }
    format!(
        "{}... ({} bytes total)",
        String::from_utf8_lossy(&body[..MAX_BODY_PREVIEW]),
        body.len()
    )
}
