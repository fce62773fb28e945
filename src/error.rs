//! Skald error types

use std::time::Duration;

/// Skald error types
#[derive(Debug, thiserror::Error)]
pub enum SkaldError {
    // Request validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Backend/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The backend answered without any text.
    #[error("empty response from model")]
    EmptyResponse,

    #[error("no provider configured")]
    NoProvider,

    /// Provider cannot handle this model; the chain should try the next one.
    #[error("model not available from this provider")]
    ModelNotAvailable,

    // Response channel / registry
    /// The stream id was never registered, was already consumed, or expired.
    #[error("no such active stream: {0}")]
    StreamNotFound(String),

    /// Append, complete or fail on a channel that already terminated.
    #[error("response channel already terminated")]
    AlreadyTerminal,

    #[error("response channel already has a reader")]
    AlreadyDraining,

    #[error("whole response does not match the streamed chunks")]
    ResponseMismatch,

    #[error("response exceeded the buffer cap of {limit} bytes")]
    BufferOverflow { limit: usize },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Wrapped llm crate error
    #[error("LLM error: {0}")]
    Llm(String),
}

impl SkaldError {
    /// Whether a retry of the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SkaldError::RateLimited { .. } | SkaldError::Http(_) => true,
            SkaldError::Api { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Provider hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SkaldError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the error originates from the generation backend.
    ///
    /// Backend errors are reported to clients with a generic message only.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            SkaldError::Http(_)
                | SkaldError::Api { .. }
                | SkaldError::RateLimited { .. }
                | SkaldError::AuthenticationFailed
                | SkaldError::ModelNotFound(_)
                | SkaldError::EmptyResponse
                | SkaldError::NoProvider
                | SkaldError::ModelNotAvailable
                | SkaldError::Llm(_)
        )
    }
}

impl From<llm::error::LLMError> for SkaldError {
    fn from(err: llm::error::LLMError) -> Self {
        // Map llm errors to our error types
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            SkaldError::RateLimited { retry_after: None }
        } else if lower.contains("authentication")
            || lower.contains("401")
            || lower.contains("invalid api key")
        {
            SkaldError::AuthenticationFailed
        } else if lower.contains("not found") || lower.contains("404") {
            SkaldError::ModelNotFound(msg)
        } else if lower.contains("timed out") || lower.contains("connection") {
            SkaldError::Http(msg)
        } else {
            SkaldError::Llm(msg)
        }
    }
}

/// Result type alias for Skald operations
pub type Result<T> = std::result::Result<T, SkaldError>;
