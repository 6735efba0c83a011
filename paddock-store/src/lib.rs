//! Object-store layer for paddock.
//!
//! Talks to any S3-compatible store and carries everything the sync engine
//! needs below the orchestration level:
//! - [`client::ObjectStoreClient`] — list/head/put/get/delete with an
//!   upload retry queue and credential hot-swap
//! - [`hash_index::ContentHashIndex`] — per-bucket key→fingerprint map,
//!   persisted as a side-car document
//! - [`compression::CompressionCodec`] — extension-gated streaming zstd
//! - [`digest`] — SHA-256 fingerprints and MD5 ETag comparison

pub mod client;
pub mod compression;
pub mod digest;
pub mod error;
pub mod hash_index;
pub mod retry;
pub mod traits;
pub mod types;

pub use client::ObjectStoreClient;
pub use compression::CompressionCodec;
pub use error::{StoreError, StoreResult};
pub use hash_index::ContentHashIndex;
pub use retry::{QueuedUpload, RetryPolicy, UploadPayload};
pub use traits::{ByteProgress, FingerprintStore, ObjectStore};
pub use types::{
    LocalEntry, RemoteEntry, StoreCredentials, HASH_STORE_KEY, INTERNAL_PREFIX, MAX_DELETE_BATCH,
    ORIGINAL_HASH_META,
};
