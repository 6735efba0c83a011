//! Interactive upload path.
//!
//! Compressible content goes up as a zstd stream tagged with the SHA-256
//! of its pre-compression bytes, which is what downloads later verify
//! against. Everything else uploads as-is.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use paddock_store::{digest, CompressionCodec, LocalEntry, ObjectStore, ORIGINAL_HASH_META};

use crate::error::{SyncError, SyncResult};

/// What an upload actually did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub compressed: bool,
    /// Fingerprint recorded for compressed uploads.
    pub original_hash: Option<String>,
    /// Bytes put on the wire (post-compression size when compressed).
    pub bytes_sent: u64,
}

pub struct ContentUploader {
    store: Arc<dyn ObjectStore>,
}

impl ContentUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn push_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> SyncResult<UploadOutcome> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        if !CompressionCodec::should_compress(key, meta.len()) {
            self.store.upload_file(bucket, key, path, None).await?;
            return Ok(UploadOutcome {
                compressed: false,
                original_hash: None,
                bytes_sent: meta.len(),
            });
        }

        let original_hash = digest::sha256_file(path).await?;
        let packed = NamedTempFile::new().map_err(|e| SyncError::io(path, e))?;
        {
            let src = path.to_path_buf();
            let dst = packed.path().to_path_buf();
            tokio::task::spawn_blocking(move || CompressionCodec::compress_file(&src, &dst))
                .await
                .map_err(|e| SyncError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })??;
        }
        let packed_len = tokio::fs::metadata(packed.path())
            .await
            .map_err(|e| SyncError::io(packed.path(), e))?
            .len();

        let metadata = HashMap::from([(ORIGINAL_HASH_META.to_string(), original_hash.clone())]);
        self.store
            .upload_file(bucket, key, packed.path(), Some(metadata))
            .await?;
        debug!(bucket, key, packed_len, "uploaded compressed");
        Ok(UploadOutcome {
            compressed: true,
            original_hash: Some(original_hash),
            bytes_sent: packed_len,
        })
    }

    /// Uploads every regular file under `dir`, keyed by its path relative
    /// to `dir` joined under `prefix`. Files go up sequentially; the first
    /// failure aborts the walk.
    pub async fn push_dir(
        &self,
        bucket: &str,
        prefix: &str,
        dir: &Path,
    ) -> SyncResult<Vec<(String, UploadOutcome)>> {
        let mut entries = LocalEntry::scan_dir(dir)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut outcomes = Vec::new();
        for entry in entries {
            if entry.is_directory {
                continue;
            }
            let relative = entry.path.strip_prefix(dir).map_err(|e| SyncError::Io {
                path: entry.path.display().to_string(),
                message: e.to_string(),
            })?;
            let suffix = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let key = if prefix.is_empty() {
                suffix
            } else {
                format!("{}/{suffix}", prefix.trim_end_matches('/'))
            };
            let outcome = self.push_file(bucket, &key, &entry.path).await?;
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }

    pub async fn push_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
    ) -> SyncResult<UploadOutcome> {
        if !CompressionCodec::should_compress(key, data.len() as u64) {
            let bytes_sent = data.len() as u64;
            self.store.upload_data(bucket, key, data, None).await?;
            return Ok(UploadOutcome {
                compressed: false,
                original_hash: None,
                bytes_sent,
            });
        }

        let original_hash = digest::sha256_bytes(&data);
        let packed = CompressionCodec::compress_data(&data)?;
        let bytes_sent = packed.len() as u64;
        let metadata = HashMap::from([(ORIGINAL_HASH_META.to_string(), original_hash.clone())]);
        self.store
            .upload_data(bucket, key, packed, Some(metadata))
            .await?;
        Ok(UploadOutcome {
            compressed: true,
            original_hash: Some(original_hash),
            bytes_sent,
        })
    }
}
