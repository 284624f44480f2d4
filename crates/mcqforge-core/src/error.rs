//! Error types for the generation pipeline.
//!
//! Only [`GenerationError`] crosses the pipeline boundary. Everything that can
//! go wrong inside a single attempt (unparseable text, invariant violations,
//! transient engine failures) is absorbed by the retry loop and only shows up
//! in the size of the result and in the report's rejection records.

use thiserror::Error;

/// Hard failures returned from [`crate::engine::Generator`].
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The inference engine could not be loaded or reported a permanent fault.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The caller asked for something the pipeline will not attempt.
    #[error("invalid generation request: {0}")]
    InvalidRequest(String),
}

/// Errors that can occur when talking to an inference engine.
///
/// Defined here so the orchestrator can downcast `anyhow` errors coming out of
/// [`crate::traits::InferenceEngine`] and decide whether an attempt failure is
/// worth retrying.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The server returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The server returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed(_) | ProviderError::ModelNotFound(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Returns `true` if an engine error is permanent.
///
/// Errors that are not a [`ProviderError`] are treated as transient.
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ProviderError>()
        .is_some_and(ProviderError::is_permanent)
}
