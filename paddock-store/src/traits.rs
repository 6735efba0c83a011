//! Seams between the store, the hash index, and the sync engine.
//!
//! `ObjectStore` is the narrow async surface the index, downloader, and
//! orchestrator consume; `ObjectStoreClient` implements it against S3 and
//! tests substitute in-memory fakes. `FingerprintStore` is the capability
//! the client borrows from the hash index, wired in after construction so
//! neither side owns the other.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::RemoteEntry;

/// Byte-level progress callback for single-object downloads. Called with
/// the cumulative byte count written so far.
pub type ByteProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// Remote bucket operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists objects under `prefix`. With a delimiter, directories are
    /// synthesized from common prefixes and sorted ahead of files, both
    /// alphabetically. Paginates internally.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> StoreResult<Vec<RemoteEntry>>;

    /// Describes a single object, or `None` when it does not exist.
    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<RemoteEntry>>;

    /// Reads the original-hash metadata value straight off the object,
    /// bypassing the hash index. Used when rebuilding the index.
    async fn original_hash_from_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<String>>;

    /// Fetches a whole object into memory.
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Streams an object to `dest`, reporting cumulative bytes written.
    /// Returns the number of bytes transferred.
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: Option<ByteProgress>,
    ) -> StoreResult<u64>;

    async fn upload_data(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()>;

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Deletes every key under `prefix` in store-bounded batches and purges
    /// the matching hash-index entries. Returns the number of keys removed.
    async fn delete_objects_recursive(&self, bucket: &str, prefix: &str) -> StoreResult<usize>;
}

/// Fingerprint bookkeeping the client performs on behalf of the hash index:
/// annotate listings, record hashes on compressed uploads, forget them on
/// delete. Implemented by `ContentHashIndex`.
pub trait FingerprintStore: Send + Sync {
    fn original_hash(&self, bucket: &str, key: &str) -> Option<String>;
    fn record(&self, bucket: &str, key: &str, hash: &str);
    fn forget(&self, bucket: &str, key: &str);
}
