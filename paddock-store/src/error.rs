//! Error taxonomy for object-store operations.

use std::path::Path;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the object store or the
/// local filesystem on its behalf.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Absent object or document. Callers usually fall back to a default.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout, connection failure, or 5xx — safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Content did not match the recorded fingerprint after decompression.
    /// Never downgraded to a warning.
    #[error("hash mismatch for {key}: expected {expected}, got {actual}")]
    HashMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Upload abandoned after the retry queue exhausted its attempts.
    #[error("upload of {key} failed after {attempts} attempts: {message}")]
    UploadFailed {
        key: String,
        attempts: u32,
        message: String,
    },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("S3 operation failed: {0}")]
    S3(String),

    #[error("compression error: {0}")]
    Compression(String),
}

impl StoreError {
    /// True for failures worth retrying (timeouts, resets, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
