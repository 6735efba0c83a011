//! Bounded-parallel downloader.
//!
//! Pulls a batch of remote objects into the local tree with at most
//! `concurrency` transfers in flight. Every file lands in a temp file next
//! to its destination, is decompressed and hash-verified when it carries a
//! pre-compression fingerprint, and only then renamed into place, so a
//! crashed or failed transfer never leaves a torn file behind. Failures are
//! collected per file; one bad object never sinks the batch.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use paddock_store::{
    digest, CompressionCodec, ObjectStore, RemoteEntry, StoreError, INTERNAL_PREFIX,
};

use crate::error::{FileFailure, SyncError, SyncResult};
use crate::freshness::{is_stale, local_path_for_key};
use crate::progress::{ActiveTransfer, NullProgressSink, ProgressSink, SyncProgress};

/// Retry knobs for a single file transfer.
#[derive(Clone, Debug)]
pub struct DownloadRetry {
    /// Total attempts per file.
    pub max_attempts: u32,
    /// Delay before the second attempt; later attempts wait
    /// `base × 2^(attempt-1)`.
    pub base_delay: Duration,
}

impl Default for DownloadRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of a download batch. The batch itself never fails; callers
/// inspect `failed` and `cancelled`.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub failed: Vec<FileFailure>,
    pub bytes_transferred: u64,
    pub cancelled: bool,
}

impl DownloadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

const DEFAULT_CONCURRENCY: usize = 8;

pub struct ConcurrentDownloader {
    store: Arc<dyn ObjectStore>,
    progress: Arc<dyn ProgressSink>,
    concurrency: usize,
    retry: DownloadRetry,
    cancel: CancellationToken,
}

impl ConcurrentDownloader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            progress: Arc::new(NullProgressSink),
            concurrency: DEFAULT_CONCURRENCY,
            retry: DownloadRetry::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: DownloadRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Lists the prefix and keeps the entries that need downloading:
    /// regular objects outside the internal prefix whose local copy is
    /// missing or stale.
    pub async fn files_to_download(
        &self,
        bucket: &str,
        prefix: &str,
        local_base: &Path,
        force: bool,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let entries = self.store.list_objects(bucket, prefix, None).await?;
        self.select_stale(entries, local_base, force).await
    }

    /// Freshness filter over an already-listed (and possibly
    /// manifest-filtered) entry set.
    pub async fn select_stale(
        &self,
        entries: Vec<RemoteEntry>,
        local_base: &Path,
        force: bool,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let mut stale = Vec::new();
        for entry in entries {
            if entry.is_directory || entry.key.starts_with(INTERNAL_PREFIX) {
                continue;
            }
            let local = local_path_for_key(local_base, &entry.key);
            if is_stale(&entry, &local, force).await {
                stale.push(entry);
            }
        }
        Ok(stale)
    }

    /// Downloads a batch with bounded parallelism. Individual failures are
    /// retried per [`DownloadRetry`] and then reported; cancellation stops
    /// scheduling new files while in-flight transfers complete.
    pub async fn download_files(
        &self,
        bucket: &str,
        files: Vec<RemoteEntry>,
        local_base: &Path,
    ) -> DownloadReport {
        let state = Arc::new(BatchState::new(
            bucket,
            files.len(),
            files.iter().map(|f| f.size).sum(),
            Arc::clone(&self.progress),
        ));
        state.push();

        let outcomes: Vec<FileOutcome> = stream::iter(files)
            .map(|file| {
                let state = Arc::clone(&state);
                async move { self.transfer_with_retries(bucket, file, local_base, state).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = DownloadReport::default();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Done => report.downloaded += 1,
                FileOutcome::Failed(failure) => report.failed.push(failure),
                FileOutcome::Skipped => report.cancelled = true,
            }
        }
        report.bytes_transferred = state.completed_bytes.load(Ordering::SeqCst);
        report.cancelled |= self.cancel.is_cancelled();
        report
    }

    async fn transfer_with_retries(
        &self,
        bucket: &str,
        file: RemoteEntry,
        local_base: &Path,
        state: Arc<BatchState>,
    ) -> FileOutcome {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return FileOutcome::Skipped;
            }
            attempt += 1;
            state.begin(&file.key);
            let result = self.transfer_once(bucket, &file, local_base, &state).await;
            state.finish(&file.key);
            match result {
                Ok(()) => {
                    state.complete_file();
                    debug!(bucket, key = %file.key, attempt, "downloaded");
                    return FileOutcome::Done;
                }
                // Verification failure will not improve on retry.
                Err(err @ SyncError::Store(StoreError::HashMismatch { .. })) => {
                    warn!(bucket, key = %file.key, error = %err, "integrity check failed");
                    return FileOutcome::Failed(FileFailure {
                        key: file.key.clone(),
                        attempts: attempt,
                        error: err.to_string(),
                    });
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        bucket,
                        key = %file.key,
                        attempt,
                        ?delay,
                        error = %err,
                        "download failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(bucket, key = %file.key, attempt, error = %err, "giving up on file");
                    return FileOutcome::Failed(FileFailure {
                        key: file.key.clone(),
                        attempts: attempt,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    /// One download attempt: fetch into a sibling temp file, decompress and
    /// verify when fingerprinted, rename into place, restore the remote
    /// mtime. Temp files are cleaned up on every failure path by drop.
    async fn transfer_once(
        &self,
        bucket: &str,
        file: &RemoteEntry,
        local_base: &Path,
        state: &Arc<BatchState>,
    ) -> SyncResult<()> {
        let dest = local_path_for_key(local_base, &file.key);
        let parent = dest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| local_base.to_path_buf());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| SyncError::io(&parent, e))?;

        let fetched =
            NamedTempFile::new_in(&parent).map_err(|e| SyncError::io(&parent, e))?;
        let byte_meter = state.byte_meter();
        self.store
            .download_to_file(bucket, &file.key, fetched.path(), Some(byte_meter))
            .await?;

        let final_temp = if let Some(expected) = &file.original_hash {
            state.set_decompressing(&file.key);
            let unpacked =
                NamedTempFile::new_in(&parent).map_err(|e| SyncError::io(&parent, e))?;
            let src = fetched.path().to_path_buf();
            let dst = unpacked.path().to_path_buf();
            tokio::task::spawn_blocking(move || CompressionCodec::decompress_file(&src, &dst))
                .await
                .map_err(|e| SyncError::Io {
                    path: dest.display().to_string(),
                    message: e.to_string(),
                })??;

            let actual = digest::sha256_file(unpacked.path()).await?;
            if &actual != expected {
                return Err(StoreError::HashMismatch {
                    key: file.key.clone(),
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
            unpacked
        } else {
            fetched
        };

        let persisted = final_temp
            .persist(&dest)
            .map_err(|e| SyncError::io(&dest, e.error))?;
        drop(persisted);

        if let Some(remote_s) = file.last_modified {
            let mtime = filetime::FileTime::from_unix_time(remote_s, 0);
            if let Err(err) = filetime::set_file_mtime(&dest, mtime) {
                debug!(key = %file.key, error = %err, "could not restore mtime");
            }
        }
        Ok(())
    }
}

enum FileOutcome {
    Done,
    Failed(FileFailure),
    Skipped,
}

/// Shared counters for one batch. Snapshots go to the sink on every file
/// state change; byte updates bump the counter without a snapshot so the
/// hot path never serializes on the sink.
struct BatchState {
    bucket: String,
    total_files: usize,
    total_bytes: u64,
    completed_files: AtomicUsize,
    completed_bytes: AtomicU64,
    active: Mutex<Vec<ActiveTransfer>>,
    sink: Arc<dyn ProgressSink>,
}

impl BatchState {
    fn new(bucket: &str, total_files: usize, total_bytes: u64, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            bucket: bucket.to_string(),
            total_files,
            total_bytes,
            completed_files: AtomicUsize::new(0),
            completed_bytes: AtomicU64::new(0),
            active: Mutex::new(Vec::new()),
            sink,
        }
    }

    /// Per-file byte callback. The store reports cumulative bytes for the
    /// file, so the meter folds deltas into the batch counter.
    fn byte_meter(self: &Arc<Self>) -> paddock_store::ByteProgress {
        let state = Arc::clone(self);
        let previous = AtomicU64::new(0);
        Arc::new(move |cumulative| {
            let prior = previous.swap(cumulative, Ordering::SeqCst);
            let delta = cumulative.saturating_sub(prior);
            state.completed_bytes.fetch_add(delta, Ordering::SeqCst);
        })
    }

    fn begin(&self, key: &str) {
        self.active.lock().push(ActiveTransfer {
            key: key.to_string(),
            decompressing: false,
        });
        self.push();
    }

    fn set_decompressing(&self, key: &str) {
        {
            let mut active = self.active.lock();
            if let Some(entry) = active.iter_mut().find(|a| a.key == key) {
                entry.decompressing = true;
            }
        }
        self.push();
    }

    fn finish(&self, key: &str) {
        self.active.lock().retain(|a| a.key != key);
        self.push();
    }

    fn complete_file(&self) {
        self.completed_files.fetch_add(1, Ordering::SeqCst);
        self.push();
    }

    fn push(&self) {
        let active = self.active.lock().clone();
        self.sink.on_progress(&SyncProgress {
            bucket: self.bucket.clone(),
            total_files: self.total_files,
            completed_files: self.completed_files.load(Ordering::SeqCst),
            total_bytes: self.total_bytes,
            completed_bytes: self.completed_bytes.load(Ordering::SeqCst),
            active,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_is_three_attempts() {
        let retry = DownloadRetry::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn clean_report_has_no_failures() {
        let mut report = DownloadReport {
            downloaded: 3,
            ..Default::default()
        };
        assert!(report.is_clean());
        report.failed.push(FileFailure {
            key: "cars/gt3/data.acd".into(),
            attempts: 3,
            error: "timeout".into(),
        });
        assert!(!report.is_clean());
    }
}
