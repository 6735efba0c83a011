//! Per-bucket sync orchestration.
//!
//! Runs the fixed pipeline for each configured bucket: initialize the hash
//! index, scan the remote tree, apply the manifest filter, diff against the
//! local tree, download what is stale, and persist the index when it picked
//! up changes. Buckets are independent; one failing bucket is reported and
//! the rest still run.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use paddock_store::{ContentHashIndex, ObjectStore};

use crate::downloader::{ConcurrentDownloader, DownloadRetry};
use crate::error::{FileFailure, SyncError, SyncResult};
use crate::manifest::SyncManifest;
use crate::progress::{NullProgressSink, ProgressSink};

/// One bucket mirrored to one local directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketBinding {
    pub bucket: String,
    pub local_dir: PathBuf,
    /// Key of the manifest object; `None` syncs the whole bucket.
    #[serde(default)]
    pub manifest_key: Option<String>,
}

/// Full sync configuration. No global tunables; everything the engine
/// needs arrives here.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub bindings: Vec<BucketBinding>,
    pub download_concurrency: usize,
    pub download_retry: DownloadRetry,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            download_concurrency: 8,
            download_retry: DownloadRetry::default(),
        }
    }
}

/// Outcome of syncing one bucket.
#[derive(Debug, Default)]
pub struct BucketReport {
    pub bucket: String,
    /// Stale files identified for download.
    pub candidates: usize,
    pub downloaded: usize,
    pub bytes_transferred: u64,
    pub failed: Vec<FileFailure>,
    pub cancelled: bool,
    /// Set when the bucket pipeline failed before downloads could run.
    pub error: Option<String>,
}

pub struct SyncOrchestrator {
    store: Arc<dyn ObjectStore>,
    index: Arc<ContentHashIndex>,
    config: SyncConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<ContentHashIndex>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            index,
            config,
            progress: Arc::new(NullProgressSink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Syncs every configured bucket in order. A failing bucket yields a
    /// report carrying its error; remaining buckets still run.
    pub async fn sync_all(&self, force: bool) -> Vec<BucketReport> {
        let mut reports = Vec::with_capacity(self.config.bindings.len());
        for binding in &self.config.bindings {
            if self.cancel.is_cancelled() {
                reports.push(BucketReport {
                    bucket: binding.bucket.clone(),
                    cancelled: true,
                    ..Default::default()
                });
                continue;
            }
            match self.sync_bucket(binding, force).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(bucket = %binding.bucket, error = %err, "bucket sync failed");
                    reports.push(BucketReport {
                        bucket: binding.bucket.clone(),
                        error: Some(err.to_string()),
                        ..Default::default()
                    });
                }
            }
        }
        reports
    }

    /// Runs the pipeline for a single bucket.
    pub async fn sync_bucket(
        &self,
        binding: &BucketBinding,
        force: bool,
    ) -> SyncResult<BucketReport> {
        self.ensure_live()?;
        tokio::fs::create_dir_all(&binding.local_dir)
            .await
            .map_err(|e| SyncError::io(&binding.local_dir, e))?;

        self.index.initialize_bucket(&binding.bucket).await;

        self.ensure_live()?;
        let mut entries = self.store.list_objects(&binding.bucket, "", None).await?;
        if let Some(manifest_key) = &binding.manifest_key {
            if let Some(manifest) =
                SyncManifest::load(&self.store, &binding.bucket, manifest_key).await?
            {
                entries = manifest.filter(entries);
            }
        }

        self.ensure_live()?;
        let downloader = ConcurrentDownloader::new(Arc::clone(&self.store))
            .with_progress(Arc::clone(&self.progress))
            .with_concurrency(self.config.download_concurrency)
            .with_retry(self.config.download_retry.clone())
            .with_cancellation(self.cancel.clone());
        let stale = downloader
            .select_stale(entries, &binding.local_dir, force)
            .await?;

        let mut report = BucketReport {
            bucket: binding.bucket.clone(),
            candidates: stale.len(),
            ..Default::default()
        };
        if stale.is_empty() {
            info!(bucket = %binding.bucket, "already up to date");
            self.persist_index(&binding.bucket).await;
            return Ok(report);
        }

        self.ensure_live()?;
        info!(bucket = %binding.bucket, files = stale.len(), "downloading stale files");
        let download = downloader
            .download_files(&binding.bucket, stale, &binding.local_dir)
            .await;
        report.downloaded = download.downloaded;
        report.bytes_transferred = download.bytes_transferred;
        report.failed = download.failed;
        report.cancelled = download.cancelled;

        self.persist_index(&binding.bucket).await;
        Ok(report)
    }

    /// Persists the hash index when it picked up changes. A failed save is
    /// a warning: the index rebuilds from object metadata if lost.
    async fn persist_index(&self, bucket: &str) {
        if !self.index.is_dirty(bucket) {
            return;
        }
        if let Err(err) = self.index.save_to_remote(bucket).await {
            warn!(bucket, error = %err, "could not persist hash index");
        }
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
