//! Shared in-memory `ObjectStore` for index tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use paddock_store::error::{StoreError, StoreResult};
use paddock_store::traits::{ByteProgress, ObjectStore};
use paddock_store::types::{leaf_name, RemoteEntry};

type Stored = (Vec<u8>, HashMap<String, String>);

/// Object store backed by a map. Metadata is honored; listings report
/// files only (no delimiter support is needed by these tests).
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<(String, String), Stored>>,
    /// Keys whose metadata lookups fail, for rebuild degradation tests.
    pub failing_metadata: Mutex<HashSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8], metadata: HashMap<String, String>) {
        self.objects
            .lock()
            .insert((bucket.into(), key.into()), (data.to_vec(), metadata));
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&(bucket.into(), key.into()))
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
            .map(|((_, k), (data, _))| RemoteEntry {
                name: leaf_name(k),
                key: k.clone(),
                is_directory: false,
                size: data.len() as u64,
                last_modified: None,
                e_tag: None,
                original_hash: None,
            })
            .collect())
    }

    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<RemoteEntry>> {
        let objects = self.objects.lock();
        Ok(objects.get(&(bucket.into(), key.into())).map(|(data, meta)| {
            RemoteEntry {
                name: leaf_name(key),
                key: key.to_string(),
                is_directory: false,
                size: data.len() as u64,
                last_modified: None,
                e_tag: None,
                original_hash: meta.get("original-hash").cloned(),
            }
        }))
    }

    async fn original_hash_from_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<String>> {
        if self.failing_metadata.lock().contains(key) {
            return Err(StoreError::Transient(format!("metadata lookup for {key}")));
        }
        let objects = self.objects.lock();
        match objects.get(&(bucket.into(), key.into())) {
            Some((_, meta)) => Ok(meta.get("original-hash").cloned()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let objects = self.objects.lock();
        objects
            .get(&(bucket.into(), key.into()))
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: Option<ByteProgress>,
    ) -> StoreResult<u64> {
        let data = self.get_object(bucket, key).await?;
        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| StoreError::Io {
                path: dest.display().to_string(),
                message: e.to_string(),
            })?;
        if let Some(callback) = progress {
            callback(data.len() as u64);
        }
        Ok(data.len() as u64)
    }

    async fn upload_data(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        self.put(bucket, key, &data, metadata.unwrap_or_default());
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
        self.put(bucket, key, &data, metadata.unwrap_or_default());
        Ok(())
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
