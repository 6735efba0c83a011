//! Sync manifest: an optional allow-list of key prefixes per bucket.
//!
//! The manifest is a YAML list of prefixes stored as a regular object in
//! the bucket. When present, only keys under one of its prefixes take part
//! in a sync pass; when absent, the whole bucket is in scope.

use std::sync::Arc;

use tracing::warn;

use paddock_store::{ObjectStore, RemoteEntry};

use crate::error::{SyncError, SyncResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncManifest {
    prefixes: Vec<String>,
}

impl SyncManifest {
    /// Parses the manifest document. The document must be a YAML sequence
    /// of strings; anything else is a parse error, not an empty manifest.
    pub fn parse(key: &str, data: &[u8]) -> SyncResult<Self> {
        let prefixes: Vec<String> =
            serde_yaml::from_slice(data).map_err(|e| SyncError::ManifestParse {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { prefixes })
    }

    /// Fetches and parses the manifest for a bucket. A missing manifest
    /// object disables filtering and is reported as `Ok(None)` after a
    /// warning; a present-but-malformed manifest is an error.
    pub async fn load(
        store: &Arc<dyn ObjectStore>,
        bucket: &str,
        key: &str,
    ) -> SyncResult<Option<Self>> {
        match store.get_object(bucket, key).await {
            Ok(data) => Ok(Some(Self::parse(key, &data)?)),
            Err(err) if err.is_not_found() => {
                warn!(bucket, key, "manifest absent, syncing entire bucket");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// True when the key falls under one of the manifest prefixes.
    pub fn matches(&self, key: &str) -> bool {
        self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Drops entries outside the manifest. Directories survive when their
    /// prefix could still contain matching keys.
    pub fn filter(&self, entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
        entries
            .into_iter()
            .filter(|entry| {
                if entry.is_directory {
                    self.matches(&entry.key)
                        || self.prefixes.iter().any(|p| p.starts_with(&entry.key))
                } else {
                    self.matches(&entry.key)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(prefixes: &[&str]) -> SyncManifest {
        SyncManifest {
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn file(key: &str) -> RemoteEntry {
        RemoteEntry {
            name: paddock_store::types::leaf_name(key),
            key: key.to_string(),
            is_directory: false,
            size: 1,
            last_modified: None,
            e_tag: None,
            original_hash: None,
        }
    }

    #[test]
    fn parse_accepts_a_sequence_of_prefixes() {
        let doc = b"- cars/a/\n- cars/c/\n";
        let m = SyncManifest::parse("sync-manifest.yaml", doc).unwrap();
        assert_eq!(m.prefixes(), ["cars/a/", "cars/c/"]);
    }

    #[test]
    fn parse_rejects_non_sequence_documents() {
        let err = SyncManifest::parse("sync-manifest.yaml", b"prefixes: nope").unwrap_err();
        assert!(matches!(err, SyncError::ManifestParse { .. }));
    }

    #[test]
    fn only_manifest_prefixes_match() {
        let m = manifest(&["cars/a/", "cars/c/"]);
        assert!(m.matches("cars/a/data.acd"));
        assert!(m.matches("cars/c/skin.json"));
        assert!(!m.matches("cars/b/data.acd"));
        assert!(!m.matches("tracks/monza/layout.ini"));
    }

    #[test]
    fn filter_keeps_parent_directories_of_prefixes() {
        let m = manifest(&["cars/a/"]);
        let entries = vec![
            RemoteEntry::directory("cars/"),
            RemoteEntry::directory("tracks/"),
            file("cars/a/data.acd"),
            file("cars/b/data.acd"),
        ];
        let kept = m.filter(entries);
        let keys: Vec<_> = kept.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["cars/", "cars/a/data.acd"]);
    }
}
