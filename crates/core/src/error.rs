//! Error types for the Synapse retrieval-and-answer pipeline.
//!
//! This module defines a unified error enum covering every failure class the
//! pipeline can surface: ingestion, embedding, retrieval, grounding, and
//! generation, plus the ambient configuration and I/O errors.

use thiserror::Error;

/// Classification of a generation backend failure.
///
/// Only transient kinds are eligible for bounded automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// The backend did not answer within the configured timeout
    Timeout,

    /// The backend throttled the request (HTTP 429 or equivalent)
    RateLimited,

    /// Connection failure or server-side (5xx) error
    Unavailable,

    /// The backend refused the request (content policy, bad request, auth)
    Rejected,

    /// The backend answered with something that could not be decoded
    Malformed,
}

impl GenerationErrorKind {
    /// Whether a failure of this kind may be retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unavailable)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::Unavailable => "unavailable",
            Self::Rejected => "rejected",
            Self::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for Synapse.
///
/// All fallible functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single document could not be read or extracted
    #[error("Ingestion error for '{document}': {reason}")]
    Ingestion { document: String, reason: String },

    /// Embedding backend unavailable or returned the wrong dimension
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index unreachable or failed
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Nothing relevant was retrieved and the policy forbids ungrounded answers
    #[error("No context: {0}")]
    NoContext(String),

    /// LLM backend failure
    #[error("Generation error ({kind}): {message}")]
    Generation {
        kind: GenerationErrorKind,
        message: String,
    },

    /// Unknown session identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but its TTL has elapsed
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Prompt rendering errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Build a generation error of the given kind.
    pub fn generation(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        AppError::Generation {
            kind,
            message: message.into(),
        }
    }

    /// Build an ingestion error for a named document.
    pub fn ingestion(document: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Ingestion {
            document: document.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may retry the failed operation.
    ///
    /// Retrieval failures may be retried once with backoff; generation
    /// failures only when their kind is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Retrieval(_) => true,
            AppError::Generation { kind, .. } => kind.is_transient(),
            _ => false,
        }
    }

    /// Whether this outcome is a normal "nothing found" answer rather than a
    /// system failure.
    pub fn is_no_context(&self) -> bool {
        matches!(self, AppError::NoContext(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
