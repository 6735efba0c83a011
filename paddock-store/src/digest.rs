//! Content digests.
//!
//! SHA-256 is the canonical fingerprint recorded for compressed uploads.
//! MD5 exists solely to compare local files against plain (non-multipart)
//! S3 ETags when no fingerprint is known.

use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{StoreError, StoreResult};

const READ_CHUNK: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercase hex SHA-256 of a file, streamed in fixed-size chunks.
pub async fn sha256_file(path: &Path) -> StoreResult<String> {
    let mut hasher = Sha256::new();
    hash_file_into(path, &mut hasher).await?;
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex MD5 of a file, for comparison against plain S3 ETags.
pub async fn md5_file(path: &Path) -> StoreResult<String> {
    let mut hasher = Md5::new();
    hash_file_into(path, &mut hasher).await?;
    Ok(hex::encode(hasher.finalize()))
}

async fn hash_file_into<H: Digest>(path: &Path, hasher: &mut H) -> StoreResult<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}
