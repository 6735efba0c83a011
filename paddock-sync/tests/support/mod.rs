//! In-memory `ObjectStore` with failure injection and a concurrency gauge.
//!
//! Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use paddock_store::error::{StoreError, StoreResult};
use paddock_store::traits::{ByteProgress, ObjectStore};
use paddock_store::types::{leaf_name, RemoteEntry, ORIGINAL_HASH_META};
use paddock_store::CompressionCodec;

#[derive(Clone, Default)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub e_tag: Option<String>,
    pub last_modified: Option<i64>,
}

/// Map-backed store. Listings and heads surface `original-hash` metadata
/// the way the real client does; tests can script download failures and
/// observe the peak number of concurrent downloads.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    /// Remaining transient failures per key.
    fail_downloads: Mutex<HashMap<String, u32>>,
    /// Artificial per-download delay, to make overlap observable.
    pub download_delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub download_count: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects.lock().insert(
            (bucket.into(), key.into()),
            StoredObject {
                data: data.to_vec(),
                ..Default::default()
            },
        );
    }

    pub fn put_object(&self, bucket: &str, key: &str, object: StoredObject) {
        self.objects.lock().insert((bucket.into(), key.into()), object);
    }

    /// Stores `original` compressed, tagged with its pre-compression
    /// fingerprint, exactly as the upload path would.
    pub fn put_compressed(&self, bucket: &str, key: &str, original: &[u8]) -> String {
        let hash = paddock_store::digest::sha256_bytes(original);
        let packed = CompressionCodec::compress_data(original).unwrap();
        self.put_object(
            bucket,
            key,
            StoredObject {
                data: packed,
                metadata: HashMap::from([(ORIGINAL_HASH_META.to_string(), hash.clone())]),
                ..Default::default()
            },
        );
        hash
    }

    pub fn fail_next_downloads(&self, key: &str, times: u32) {
        self.fail_downloads.lock().insert(key.to_string(), times);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(&(bucket.into(), key.into())).cloned()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object(bucket, key).is_some()
    }

    fn entry_for(key: &str, object: &StoredObject) -> RemoteEntry {
        RemoteEntry {
            name: leaf_name(key),
            key: key.to_string(),
            is_directory: false,
            size: object.data.len() as u64,
            last_modified: object.last_modified,
            e_tag: object.e_tag.clone(),
            original_hash: object.metadata.get(ORIGINAL_HASH_META).cloned(),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        _delimiter: Option<&str>,
    ) -> StoreResult<Vec<RemoteEntry>> {
        let objects = self.objects.lock();
        Ok(objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), object)| Self::entry_for(k, object))
            .collect())
    }

    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<RemoteEntry>> {
        Ok(self.object(bucket, key).map(|o| Self::entry_for(key, &o)))
    }

    async fn original_hash_from_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<String>> {
        match self.object(bucket, key) {
            Some(object) => Ok(object.metadata.get(ORIGINAL_HASH_META).cloned()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        self.object(bucket, key)
            .map(|o| o.data)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: Option<ByteProgress>,
    ) -> StoreResult<u64> {
        self.download_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut failing = self.fail_downloads.lock();
            if let Some(remaining) = failing.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Transient(format!("injected failure for {key}")));
                }
            }
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let delay = *self.download_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = async {
            let data = self.get_object(bucket, key).await?;
            tokio::fs::write(dest, &data)
                .await
                .map_err(|e| StoreError::Io {
                    path: dest.display().to_string(),
                    message: e.to_string(),
                })?;
            if let Some(callback) = &progress {
                callback(data.len() as u64);
            }
            Ok(data.len() as u64)
        }
        .await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn upload_data(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        self.put_object(
            bucket,
            key,
            StoredObject {
                data,
                metadata: metadata.unwrap_or_default(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        let data = tokio::fs::read(path).await.map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.upload_data(bucket, key, data, metadata).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.objects.lock().remove(&(bucket.into(), key.into()));
        Ok(())
    }

    async fn delete_objects_recursive(&self, bucket: &str, prefix: &str) -> StoreResult<usize> {
        let mut objects = self.objects.lock();
        let doomed: Vec<(String, String)> = objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            objects.remove(key);
        }
        Ok(doomed.len())
    }
}
