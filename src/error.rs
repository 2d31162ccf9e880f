//! Error taxonomy for the pipeline
//!
//! Three tiers: fatal errors abort the run after a best-effort flush,
//! retryable errors are retried with backoff before escalating, and
//! per-item failures are recorded as skips without touching the batch.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the generative text API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication rejected by the API. Never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by the API")]
    RateLimited,

    /// Server-side failure (5xx) or transport-level error.
    #[error("api request failed: {0}")]
    Transport(String),

    /// Response arrived but did not match the expected completion shape.
    #[error("malformed api response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_) | ApiError::RateLimited | ApiError::Transport(_)
        )
    }
}

/// Errors from the tool-invocation service.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no session endpoint negotiated with the tool service")]
    NotConnected,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran and reported an error payload.
    #[error("tool invocation failed: {0}")]
    Invocation(String),

    #[error("tool service session expired")]
    SessionExpired,

    #[error("tool service request failed: {0}")]
    Transport(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::SessionExpired | ToolError::Transport(_))
    }
}

/// Top-level error type. Only the controllers decide whether one of these
/// aborts the run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The durable state file exists but cannot be trusted. Treated as
    /// fatal rather than reset, so a half-written file can never cause
    /// silent duplicate generation.
    #[error("state file {path} is corrupted: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    /// The generator stopped making progress: every recent batch came
    /// back empty or fully duplicated.
    #[error("no progress after {batches} consecutive zero-yield batches")]
    Stalled { batches: u32 },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reason codes for items the completion phase skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoConfidentToolMatch,
    EmptyQuestion,
    ToolInvocationFailed,
    GenerationFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            SkipReason::NoConfidentToolMatch => "no confident tool match",
            SkipReason::EmptyQuestion => "empty question",
            SkipReason::ToolInvocationFailed => "tool invocation failed",
            SkipReason::GenerationFailed => "generation failed",
        };
        write!(f, "{}", code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        assert!(ApiError::RateLimited.is_retryable());
        assert!(ApiError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ApiError::Transport("502 bad gateway".into()).is_retryable());
        assert!(!ApiError::Auth("bad key".into()).is_retryable());
        assert!(!ApiError::Malformed("no choices".into()).is_retryable());
    }

    #[test]
    fn test_tool_error_classification() {
        assert!(ToolError::SessionExpired.is_retryable());
        assert!(!ToolError::UnknownTool("nope".into()).is_retryable());
        assert!(!ToolError::Invocation("boom".into()).is_retryable());
    }
}
