//! Error taxonomy shared by every layer of the crate.
//!
//! All failures surface to the caller as a [`ChatError`]; nothing is retried
//! or swallowed internally. Use [`ChatError::is_retryable`] to decide whether
//! a fresh attempt makes sense (see [`crate::retry`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A template placeholder had no matching parameter.
    #[error("missing template parameter '{name}'")]
    MissingParameter { name: String },

    /// Transport or provider failure. `status` is `None` for network errors
    /// that never produced an HTTP status.
    #[error("upstream failure{}: {message}", status_suffix(.status))]
    Upstream { status: Option<u16>, message: String },

    /// The provider answered without a single generation.
    #[error("provider returned no generations")]
    EmptyResponse,

    /// Structured decoding failed. `raw` holds the model output verbatim.
    #[error("response does not match schema '{schema}': {reason}")]
    SchemaMismatch {
        schema: String,
        reason: String,
        raw: String,
    },

    #[error("invalid prompt request: {0}")]
    InvalidRequest(String),

    #[error("invalid schema descriptor: {0}")]
    InvalidSchema(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl ChatError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for a network-level failure without an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::upstream(None, message)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn vector_store(msg: impl Into<String>) -> Self {
        Self::VectorStore(msg.into())
    }

    /// Whether a fresh attempt could plausibly succeed: rate limits, server
    /// errors and transport failures. Caller bugs and provider contract
    /// violations are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status: None, .. } => true,
            Self::Upstream {
                status: Some(code), ..
            } => *code == 429 || (500..=599).contains(code),
            _ => false,
        }
    }

    /// Raw model output attached to a [`ChatError::SchemaMismatch`].
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::SchemaMismatch { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_display_includes_status() {
        let err = ChatError::upstream(Some(502), "bad gateway");
        assert_eq!(err.to_string(), "upstream failure (HTTP 502): bad gateway");

        let err = ChatError::transport("connection reset");
        assert_eq!(err.to_string(), "upstream failure: connection reset");
    }

    #[test]
    fn retryable_classification() {
        assert!(ChatError::upstream(Some(429), "slow down").is_retryable());
        assert!(ChatError::upstream(Some(503), "unavailable").is_retryable());
        assert!(ChatError::transport("timed out").is_retryable());

        assert!(!ChatError::upstream(Some(400), "bad request").is_retryable());
        assert!(!ChatError::upstream(Some(401), "unauthorized").is_retryable());
        assert!(!ChatError::EmptyResponse.is_retryable());
        assert!(
            !ChatError::MissingParameter {
                name: "voice".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn raw_output_only_for_schema_mismatch() {
        let err = ChatError::SchemaMismatch {
            schema: "ActorFilms".into(),
            reason: "expected object".into(),
            raw: "[1, 2".into(),
        };
        assert_eq!(err.raw_output(), Some("[1, 2"));
        assert!(ChatError::EmptyResponse.raw_output().is_none());
    }
}
