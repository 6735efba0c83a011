//! Sync engine for paddock.
//!
//! Mirrors S3-compatible buckets into local directory trees:
//! - [`freshness`] — one canonical stale/fresh decision
//! - [`manifest::SyncManifest`] — optional per-bucket prefix allow-list
//! - [`downloader::ConcurrentDownloader`] — bounded-parallel downloads with
//!   integrity verification and per-file retry
//! - [`orchestrator::SyncOrchestrator`] — the per-bucket pipeline
//! - [`uploader::ContentUploader`] — compress-and-tag upload helper

pub mod downloader;
pub mod error;
pub mod freshness;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod uploader;

pub use downloader::{ConcurrentDownloader, DownloadReport, DownloadRetry};
pub use error::{FileFailure, SyncError, SyncResult};
pub use manifest::SyncManifest;
pub use orchestrator::{BucketBinding, BucketReport, SyncConfig, SyncOrchestrator};
pub use progress::{ActiveTransfer, NullProgressSink, ProgressSink, SyncProgress};
pub use uploader::{ContentUploader, UploadOutcome};
