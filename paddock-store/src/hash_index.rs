//! Per-bucket content-hash index.
//!
//! Maps object keys to the hex digest of their pre-compression bytes, so a
//! sync pass can tell whether a local file matches a compressed remote
//! object without downloading it. Persisted as a side-car YAML document
//! inside the bucket; the whole per-bucket map is the unit of persistence
//! (whole-document overwrite, no merge). A dirty flag tracks unsaved
//! mutations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::traits::{FingerprintStore, ObjectStore};
use crate::types::{HASH_STORE_KEY, INTERNAL_PREFIX};

#[derive(Default)]
struct BucketIndex {
    entries: HashMap<String, String>,
    dirty: bool,
}

pub struct ContentHashIndex {
    store: Arc<dyn ObjectStore>,
    buckets: RwLock<HashMap<String, BucketIndex>>,
}

impl ContentHashIndex {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the side-car document for a bucket. Idempotent; a missing or
    /// corrupt document starts the bucket from an empty map. Never fails.
    pub async fn initialize_bucket(&self, bucket: &str) {
        if self.buckets.read().contains_key(bucket) {
            return;
        }
        let entries = match self.store.get_object(bucket, HASH_STORE_KEY).await {
            Ok(bytes) => match serde_yaml::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(map) => {
                    debug!(bucket, entries = map.len(), "loaded hash index");
                    map
                }
                Err(err) => {
                    warn!(bucket, error = %err, "hash index document is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(err) if err.is_not_found() => {
                debug!(bucket, "no hash index document, starting empty");
                HashMap::new()
            }
            Err(err) => {
                warn!(bucket, error = %err, "failed to fetch hash index, starting empty");
                HashMap::new()
            }
        };
        self.buckets.write().entry(bucket.to_string()).or_insert(BucketIndex {
            entries,
            dirty: false,
        });
    }

    pub fn original_hash(&self, bucket: &str, key: &str) -> Option<String> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|b| b.entries.get(key).cloned())
    }

    pub fn set_original_hash(&self, bucket: &str, key: &str, hash: &str) {
        let mut buckets = self.buckets.write();
        let state = buckets.entry(bucket.to_string()).or_default();
        state.entries.insert(key.to_string(), hash.to_string());
        state.dirty = true;
    }

    /// Drops a key from the index; marks dirty only when something was
    /// actually removed.
    pub fn remove_hash(&self, bucket: &str, key: &str) {
        let mut buckets = self.buckets.write();
        if let Some(state) = buckets.get_mut(bucket) {
            if state.entries.remove(key).is_some() {
                state.dirty = true;
            }
        }
    }

    pub fn is_dirty(&self, bucket: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.dirty)
            .unwrap_or(false)
    }

    pub fn mark_clean(&self, bucket: &str) {
        if let Some(state) = self.buckets.write().get_mut(bucket) {
            state.dirty = false;
        }
    }

    /// Serializes the full map and overwrites the side-car document.
    pub async fn save_to_remote(&self, bucket: &str) -> StoreResult<()> {
        let doc = {
            let buckets = self.buckets.read();
            let entries = buckets.get(bucket).map(|b| &b.entries);
            match entries {
                Some(map) => serde_yaml::to_string(map)?,
                None => serde_yaml::to_string(&HashMap::<String, String>::new())?,
            }
        };
        self.store
            .upload_data(bucket, HASH_STORE_KEY, doc.into_bytes(), None)
            .await?;
        self.mark_clean(bucket);
        debug!(bucket, "hash index persisted");
        Ok(())
    }

    /// Disaster recovery: walks every object, reads its raw metadata
    /// (bypassing this index), rebuilds the map from any original-hash
    /// values found, and saves immediately. Per-object metadata failures
    /// degrade to a warning.
    pub async fn rebuild_from_remote(&self, bucket: &str) -> StoreResult<()> {
        let entries = self.store.list_objects(bucket, "", None).await?;
        let mut rebuilt: HashMap<String, String> = HashMap::new();
        for entry in entries {
            if entry.is_directory || entry.key.starts_with(INTERNAL_PREFIX) {
                continue;
            }
            match self
                .store
                .original_hash_from_metadata(bucket, &entry.key)
                .await
            {
                Ok(Some(hash)) => {
                    rebuilt.insert(entry.key, hash);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(bucket, key = %entry.key, error = %err, "metadata lookup failed during rebuild, skipping");
                }
            }
        }
        info!(bucket, entries = rebuilt.len(), "hash index rebuilt from remote metadata");
        {
            let mut buckets = self.buckets.write();
            buckets.insert(
                bucket.to_string(),
                BucketIndex {
                    entries: rebuilt,
                    dirty: true,
                },
            );
        }
        self.save_to_remote(bucket).await
    }
}

impl FingerprintStore for ContentHashIndex {
    fn original_hash(&self, bucket: &str, key: &str) -> Option<String> {
        ContentHashIndex::original_hash(self, bucket, key)
    }

    fn record(&self, bucket: &str, key: &str, hash: &str) {
        self.set_original_hash(bucket, key, hash);
    }

    fn forget(&self, bucket: &str, key: &str) {
        self.remove_hash(bucket, key);
    }
}
