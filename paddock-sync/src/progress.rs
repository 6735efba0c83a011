//! Progress reporting surface.
//!
//! The downloader pushes a fresh snapshot on every state change; sinks must
//! not block, as they run on the download tasks' path.

/// A file currently in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveTransfer {
    pub key: String,
    /// True while the post-download decompression step runs.
    pub decompressing: bool,
}

/// Snapshot of a download batch. Counters never decrease within a batch.
#[derive(Clone, Debug, Default)]
pub struct SyncProgress {
    pub bucket: String,
    pub total_files: usize,
    pub completed_files: usize,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub active: Vec<ActiveTransfer>,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &SyncProgress);
}

/// Sink that discards everything. Default for unattended runs.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _progress: &SyncProgress) {}
}
