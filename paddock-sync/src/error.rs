//! Error taxonomy for the sync engine.

use std::path::Path;

use paddock_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The manifest object existed but was not a YAML list of prefixes.
    #[error("manifest {key} is malformed: {message}")]
    ManifestParse { key: String, message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        SyncError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// One file that could not be brought up to date. Carried in the batch
/// report; never aborts the batch.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub key: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    pub error: String,
}
