//! Error types.
//!
//! Dataset and scoring errors are fatal schema problems and always name the
//! offending record. Provider errors live here too so the run engine can
//! downcast and classify them for retry decisions without string matching.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or validating a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON on line {line} of {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record on line {line} is not a JSON object")]
    NotAnObject { line: usize },

    #[error("example missing required fields {fields:?}: {id}")]
    MissingFields { id: String, fields: Vec<&'static str> },

    #[error("invalid {field} for example {id}: {reason}")]
    InvalidField {
        id: String,
        field: &'static str,
        reason: String,
    },

    #[error("unknown task_type '{value}' for example {id}")]
    UnknownTaskType { id: String, value: String },
}

/// Hard failures of the scorer. Everything else is a zero score.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("gold answer for {id} must be a mapping for json_mapping")]
    GoldNotMapping { id: String },
}

/// Errors that can occur when talking to a model backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backend returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The requested model is not available on the backend.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The backend returned an error response.
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
        matches!(self, ProviderError::ModelNotFound(_))
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
