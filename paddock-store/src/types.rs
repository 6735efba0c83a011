//! Shared types for object-store and sync operations.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Prefix reserved for paddock-internal documents inside a bucket.
/// Keys under this prefix never take part in a sync pass.
pub const INTERNAL_PREFIX: &str = ".paddock/";

/// Per-bucket side-car document holding the content-hash index.
pub const HASH_STORE_KEY: &str = ".paddock/hash-store.yaml";

/// User-metadata key tagging compressed uploads with the hash of their
/// pre-compression bytes.
pub const ORIGINAL_HASH_META: &str = "original-hash";

/// S3 caps DeleteObjects at this many keys per request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Static credentials for an S3-compatible endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Endpoint override for non-AWS stores (MinIO, Cloudflare R2, ...).
    pub endpoint_url: Option<String>,
}

/// A remote object or synthesized directory, built fresh from each
/// list/describe call. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Last path component of the key.
    pub name: String,
    /// Full key within the bucket (trailing `/` for directories).
    pub key: String,
    pub is_directory: bool,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: Option<i64>,
    /// ETag with surrounding quotes stripped.
    pub e_tag: Option<String>,
    /// Pre-compression content hash, present only for objects uploaded
    /// through the compression path.
    pub original_hash: Option<String>,
}

impl RemoteEntry {
    /// Synthesizes a directory entry from a common prefix.
    pub fn directory(prefix: &str) -> Self {
        Self {
            name: leaf_name(prefix),
            key: prefix.to_string(),
            is_directory: true,
            size: 0,
            last_modified: None,
            e_tag: None,
            original_hash: None,
        }
    }

    /// Objects carry the original-hash tag only when they were compressed
    /// on upload.
    pub fn is_compressed(&self) -> bool {
        self.original_hash.is_some()
    }
}

/// A file or directory found by local enumeration. Ephemeral; the content
/// hash is computed on demand via [`crate::digest`].
#[derive(Clone, Debug)]
pub struct LocalEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: Option<i64>,
}

impl LocalEntry {
    pub fn from_path(path: &Path) -> StoreResult<Self> {
        let meta = std::fs::metadata(path).map_err(|e| StoreError::io(path, e))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            path: path.to_path_buf(),
            is_directory: meta.is_dir(),
            size: meta.len(),
            modified,
        })
    }

    /// Recursively enumerates a directory tree.
    pub fn scan_dir(base: &Path) -> StoreResult<Vec<LocalEntry>> {
        let mut out = Vec::new();
        let mut pending = vec![base.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let reader = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
            for item in reader {
                let item = item.map_err(|e| StoreError::io(&dir, e))?;
                let entry = LocalEntry::from_path(&item.path())?;
                if entry.is_directory {
                    pending.push(entry.path.clone());
                }
                out.push(entry);
            }
        }
        Ok(out)
    }
}

/// Returns the last path component of a key or prefix.
pub fn leaf_name(key: &str) -> String {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(key)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_name_of_nested_key() {
        assert_eq!(leaf_name("cars/gt3/model.kn5"), "model.kn5");
    }

    #[test]
    fn leaf_name_of_directory_prefix() {
        assert_eq!(leaf_name("cars/gt3/"), "gt3");
    }

    #[test]
    fn leaf_name_of_bare_key() {
        assert_eq!(leaf_name("readme.txt"), "readme.txt");
    }

    #[test]
    fn directory_entry_is_not_compressed() {
        let dir = RemoteEntry::directory("tracks/monza/");
        assert!(dir.is_directory);
        assert_eq!(dir.name, "monza");
        assert!(!dir.is_compressed());
    }

    #[test]
    fn from_path_reports_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.ini");
        std::fs::write(&path, b"[GEARS]\nFINAL=4.2\n").unwrap();

        let entry = LocalEntry::from_path(&path).unwrap();
        assert_eq!(entry.name, "setup.ini");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, 18);
        assert!(entry.modified.is_some());
    }

    #[test]
    fn from_path_fails_on_missing_file() {
        let err = LocalEntry::from_path(Path::new("/nonexistent/paddock/file"));
        assert!(matches!(err, Err(StoreError::Io { .. })));
    }

    #[test]
    fn scan_dir_walks_the_whole_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("gt3/ai")).unwrap();
        std::fs::write(dir.path().join("gt3/data.acd"), b"data").unwrap();
        std::fs::write(dir.path().join("gt3/ai/fast_lane.ai"), b"spline").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"hello").unwrap();

        let entries = LocalEntry::scan_dir(dir.path()).unwrap();
        let mut files: Vec<&str> = entries
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.name.as_str())
            .collect();
        files.sort_unstable();
        assert_eq!(files, ["data.acd", "fast_lane.ai", "readme.txt"]);
        assert_eq!(entries.iter().filter(|e| e.is_directory).count(), 2);
    }
}
