//! Error taxonomy for the generation gateway.
//!
//! Store and retriever failures propagate as plain `anyhow` errors — they are
//! infrastructure failures and are not masked. Generation failures carry a
//! typed classification so the retry loop and the answer assembler can treat
//! them differently.

use std::time::Duration;

use thiserror::Error;

/// Failure modes of a generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider credentials or routing are missing. Fatal; never retried.
    #[error("provider not configured: {0}")]
    Configuration(String),

    /// Network or provider-side failure. Retried up to the attempt budget.
    #[error("provider call failed: {0}")]
    Transport(String),

    /// The per-attempt deadline elapsed. Retried like a transport error, but
    /// kept distinct so callers can surface a tailored message.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with a body we could not interpret. Treated as
    /// a transport error for retry purposes.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl GenerationError {
    /// Whether the retry loop may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Configuration(_))
    }

    /// Whether this is a timeout-class failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout(_))
    }
}
