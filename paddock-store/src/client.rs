//! S3 object-store client.
//!
//! Wraps the AWS SDK client behind the [`ObjectStore`] seam, adds listing
//! with synthesized directories, metadata-tagged uploads routed through the
//! retry queue on transient failure, batched recursive deletes, and
//! credential hot-swap. Fingerprint bookkeeping is delegated to whatever
//! [`FingerprintStore`] the orchestrator wires in.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::retry::{QueuedUpload, RetryPolicy, RetryQueue, RetryUploader, UploadPayload};
use crate::traits::{ByteProgress, FingerprintStore, ObjectStore};
use crate::types::{
    leaf_name, RemoteEntry, StoreCredentials, MAX_DELETE_BATCH, ORIGINAL_HASH_META,
};

/// Remote bucket operations plus the upload retry queue.
pub struct ObjectStoreClient {
    inner: Arc<ClientInner>,
    retry: RetryQueue,
    retry_policy: RetryPolicy,
}

struct ClientInner {
    /// Swapped wholesale by `update_credentials`; readers clone the handle,
    /// so in-flight calls finish against the old connection.
    conn: tokio::sync::RwLock<S3Client>,
    region: String,
    fingerprints: parking_lot::RwLock<Option<Arc<dyn FingerprintStore>>>,
}

impl ClientInner {
    async fn client(&self) -> S3Client {
        self.conn.read().await.clone()
    }

    fn lookup_fingerprint(&self, bucket: &str, key: &str) -> Option<String> {
        self.fingerprints
            .read()
            .as_ref()
            .and_then(|fp| fp.original_hash(bucket, key))
    }

    fn record_fingerprint(&self, bucket: &str, key: &str, metadata: Option<&HashMap<String, String>>) {
        let Some(hash) = metadata.and_then(|m| m.get(ORIGINAL_HASH_META)) else {
            return;
        };
        if let Some(fp) = self.fingerprints.read().as_ref() {
            fp.record(bucket, key, hash);
        }
    }

    fn forget_fingerprint(&self, bucket: &str, key: &str) {
        if let Some(fp) = self.fingerprints.read().as_ref() {
            fp.forget(bucket, key);
        }
    }

    /// One upload attempt, classification included.
    async fn put_object(&self, upload: &QueuedUpload) -> StoreResult<()> {
        let client = self.client().await;
        let body = match &upload.payload {
            UploadPayload::Bytes(bytes) => ByteStream::from(bytes.clone()),
            UploadPayload::File(path) => ByteStream::from_path(path)
                .await
                .map_err(|e| StoreError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?,
        };
        let mut request = client
            .put_object()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .content_type(content_type_for(&upload.key))
            .body(body);
        if let Some(metadata) = &upload.metadata {
            for (name, value) in metadata {
                request = request.metadata(name, value);
            }
        }
        request.send().await.map_err(classify_sdk_error)?;
        Ok(())
    }
}

#[async_trait]
impl RetryUploader for ClientInner {
    async fn retry_upload(&self, upload: &QueuedUpload) -> StoreResult<()> {
        self.put_object(upload).await
    }
}

fn build_client(credentials: &StoreCredentials) -> S3Client {
    let provider = aws_credential_types::Credentials::new(
        &credentials.access_key_id,
        &credentials.secret_access_key,
        None,
        None,
        "paddock",
    );
    let mut builder = aws_sdk_s3::Config::builder()
        .region(aws_types::region::Region::new(credentials.region.clone()))
        .credentials_provider(provider)
        .behavior_version_latest();
    if let Some(endpoint) = &credentials.endpoint_url {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    S3Client::from_conf(builder.build())
}

impl ObjectStoreClient {
    /// Builds the client and spawns its retry worker. Must be called within
    /// a Tokio runtime.
    pub fn new(credentials: StoreCredentials, retry_policy: RetryPolicy) -> Self {
        let inner = Arc::new(ClientInner {
            region: credentials.region.clone(),
            conn: tokio::sync::RwLock::new(build_client(&credentials)),
            fingerprints: parking_lot::RwLock::new(None),
        });
        let retry = RetryQueue::start(
            Arc::clone(&inner) as Arc<dyn RetryUploader>,
            retry_policy.clone(),
        );
        Self {
            inner,
            retry,
            retry_policy,
        }
    }

    /// Wires in the fingerprint capability. Called once by the orchestrator
    /// after both sides exist; listings before that carry no hashes.
    pub fn set_fingerprint_store(&self, fingerprints: Arc<dyn FingerprintStore>) {
        *self.inner.fingerprints.write() = Some(fingerprints);
    }

    /// Swaps the underlying connection. In-flight calls hold a clone of the
    /// old handle and are not aborted.
    pub async fn update_credentials(
        &self,
        access_key_id: &str,
        secret_access_key: &str,
        endpoint_url: Option<&str>,
    ) {
        let credentials = StoreCredentials {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            region: self.inner.region.clone(),
            endpoint_url: endpoint_url.map(str::to_string),
        };
        *self.inner.conn.write().await = build_client(&credentials);
        info!("object store credentials updated");
    }

    /// Pending-retry count, for observability.
    pub fn retry_queue_depth(&self) -> usize {
        self.retry.depth()
    }

    async fn upload(&self, upload: QueuedUpload) -> StoreResult<()> {
        let bucket = upload.bucket.clone();
        let key = upload.key.clone();
        let metadata = upload.metadata.clone();
        match self.inner.put_object(&upload).await {
            Ok(()) => {
                debug!(bucket, key, "uploaded");
            }
            Err(err) if err.is_transient() => {
                warn!(bucket, key, error = %err, "transient upload failure, parking on retry queue");
                let mut upload = upload;
                upload.attempts = 1;
                self.retry
                    .park(upload, self.retry_policy.base_delay)
                    .await?;
            }
            Err(err) => return Err(err),
        }
        self.inner
            .record_fingerprint(&bucket, &key, metadata.as_ref());
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreClient {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> StoreResult<Vec<RemoteEntry>> {
        let client = self.inner.client().await;
        let mut directories: Vec<RemoteEntry> = Vec::new();
        let mut files: Vec<RemoteEntry> = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(delimiter) = delimiter {
                request = request.delimiter(delimiter);
            }
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request.send().await.map_err(classify_sdk_error)?;

            for common in response.common_prefixes() {
                if let Some(dir_prefix) = common.prefix() {
                    directories.push(RemoteEntry::directory(dir_prefix));
                }
            }
            for object in response.contents() {
                let key = object.key().unwrap_or_default().to_string();
                let last_modified = object
                    .last_modified()
                    .and_then(|dt| dt.to_millis().ok())
                    .map(|ms| ms / 1000);
                files.push(RemoteEntry {
                    name: leaf_name(&key),
                    original_hash: self.inner.lookup_fingerprint(bucket, &key),
                    is_directory: false,
                    size: object.size().map(|s| s as u64).unwrap_or(0),
                    last_modified,
                    e_tag: object.e_tag().map(|t| t.trim_matches('"').to_string()),
                    key,
                });
            }

            if response.is_truncated() == Some(true) {
                continuation = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(order_listing(directories, files))
    }

    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<RemoteEntry>> {
        let client = self.inner.client().await;
        match client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => {
                let original_hash = response
                    .metadata()
                    .and_then(|m| m.get(ORIGINAL_HASH_META).cloned())
                    .or_else(|| self.inner.lookup_fingerprint(bucket, key));
                let last_modified = response
                    .last_modified()
                    .and_then(|dt| dt.to_millis().ok())
                    .map(|ms| ms / 1000);
                Ok(Some(RemoteEntry {
                    name: leaf_name(key),
                    key: key.to_string(),
                    is_directory: key.ends_with('/'),
                    size: response.content_length().map(|l| l as u64).unwrap_or(0),
                    last_modified,
                    e_tag: response.e_tag().map(|t| t.trim_matches('"').to_string()),
                    original_hash,
                }))
            }
            Err(err) => {
                if matches!(&err, SdkError::ServiceError(ctx) if ctx.err().is_not_found()) {
                    return Ok(None);
                }
                Err(classify_sdk_error(err))
            }
        }
    }

    async fn original_hash_from_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<Option<String>> {
        let client = self.inner.client().await;
        match client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => Ok(response
                .metadata()
                .and_then(|m| m.get(ORIGINAL_HASH_META).cloned())),
            Err(err) => {
                if matches!(&err, SdkError::ServiceError(ctx) if ctx.err().is_not_found()) {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                Err(classify_sdk_error(err))
            }
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let client = self.inner.client().await;
        let response = match client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                if matches!(&err, SdkError::ServiceError(ctx) if ctx.err().is_no_such_key()) {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                return Err(classify_sdk_error(err));
            }
        };
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(format!("reading body of {key}: {e}")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: Option<ByteProgress>,
    ) -> StoreResult<u64> {
        let client = self.inner.client().await;
        let response = match client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                if matches!(&err, SdkError::ServiceError(ctx) if ctx.err().is_no_such_key()) {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                return Err(classify_sdk_error(err));
            }
        };

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| StoreError::io(dest, e))?;
        let mut body = response.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StoreError::Transient(format!("streaming {key}: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| StoreError::io(dest, e))?;
            written += chunk.len() as u64;
            if let Some(callback) = &progress {
                callback(written);
            }
        }
        file.flush().await.map_err(|e| StoreError::io(dest, e))?;
        debug!(bucket, key, bytes = written, "downloaded object");
        Ok(written)
    }

    async fn upload_data(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        self.upload(QueuedUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            payload: UploadPayload::Bytes(data),
            metadata,
            attempts: 0,
        })
        .await
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        self.upload(QueuedUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            payload: UploadPayload::File(path.to_path_buf()),
            metadata,
            attempts: 0,
        })
        .await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let client = self.inner.client().await;
        client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        self.inner.forget_fingerprint(bucket, key);
        debug!(bucket, key, "deleted object");
        Ok(())
    }

    async fn delete_objects_recursive(&self, bucket: &str, prefix: &str) -> StoreResult<usize> {
        let keys: Vec<String> = self
            .list_objects(bucket, prefix, None)
            .await?
            .into_iter()
            .filter(|entry| !entry.is_directory)
            .map(|entry| entry.key)
            .collect();

        let client = self.inner.client().await;
        let removed = delete_in_batches(
            keys,
            |batch| {
                let client = client.clone();
                let bucket = bucket.to_string();
                async move {
                    let identifiers: Vec<ObjectIdentifier> = batch
                        .iter()
                        .map(|key| {
                            ObjectIdentifier::builder()
                                .key(key)
                                .build()
                                .map_err(|e| StoreError::S3(format!("building delete batch: {e}")))
                        })
                        .collect::<StoreResult<_>>()?;
                    let delete = Delete::builder()
                        .set_objects(Some(identifiers))
                        .build()
                        .map_err(|e| StoreError::S3(format!("building delete batch: {e}")))?;
                    client
                        .delete_objects()
                        .bucket(&bucket)
                        .delete(delete)
                        .send()
                        .await
                        .map_err(classify_sdk_error)?;
                    Ok(())
                }
            },
            |key| self.inner.forget_fingerprint(bucket, key),
        )
        .await?;
        info!(bucket, prefix, removed, "recursive delete finished");
        Ok(removed)
    }
}

/// Directories ahead of files, both in key order, so the result is stable
/// for delimited and recursive listings alike.
fn order_listing(
    mut directories: Vec<RemoteEntry>,
    mut files: Vec<RemoteEntry>,
) -> Vec<RemoteEntry> {
    directories.sort_by(|a, b| a.key.cmp(&b.key));
    files.sort_by(|a, b| a.key.cmp(&b.key));
    directories.extend(files);
    directories
}

/// Deletes keys in store-acceptable batches, purging the fingerprint of
/// every key in a batch once that batch is confirmed gone. A failing batch
/// aborts the walk; keys it covered keep their fingerprints.
async fn delete_in_batches<F, Fut>(
    keys: Vec<String>,
    mut send_batch: F,
    forget: impl Fn(&str),
) -> StoreResult<usize>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = StoreResult<()>>,
{
    let mut removed = 0usize;
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        send_batch(batch.to_vec()).await?;
        for key in batch {
            forget(key);
        }
        removed += batch.len();
    }
    Ok(removed)
}

/// Maps SDK failures onto the store taxonomy: timeouts, dispatch failures,
/// malformed responses, and 5xx are transient; everything else surfaces as
/// a plain S3 failure.
fn classify_sdk_error<E>(err: SdkError<E>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Transient(err.to_string())
        }
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            if (500..=599).contains(&status) {
                StoreError::Transient(format!("status {status}: {}", context.err()))
            } else {
                StoreError::S3(format!("status {status}: {}", context.err()))
            }
        }
        _ => StoreError::S3(err.to_string()),
    }
}

/// Content type inferred from the key's extension.
fn content_type_for(key: &str) -> &'static str {
    let extension = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("json") => "application/json",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("xml") => "application/xml",
        Some("txt") | Some("ini") | Some("cfg") | Some("log") | Some("lut") => "text/plain",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("dds") => "image/vnd-ms.dds",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn key_list(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("tracks/old/{i:04}")).collect()
    }

    #[tokio::test]
    async fn deletes_split_at_store_limit_and_purge_each_batch() {
        let batch_sizes = RefCell::new(Vec::new());
        let forgotten = RefCell::new(Vec::new());

        let removed = delete_in_batches(
            key_list(1500),
            |batch| {
                batch_sizes.borrow_mut().push(batch.len());
                async { Ok(()) }
            },
            |key| forgotten.borrow_mut().push(key.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(removed, 1500);
        assert_eq!(*batch_sizes.borrow(), vec![1000, 500]);
        assert_eq!(forgotten.borrow().len(), 1500);
        assert_eq!(forgotten.borrow()[0], "tracks/old/0000");
        assert_eq!(forgotten.borrow()[1499], "tracks/old/1499");
    }

    #[tokio::test]
    async fn failed_batch_keeps_its_fingerprints() {
        let calls = RefCell::new(0u32);
        let forgotten = RefCell::new(Vec::new());

        let err = delete_in_batches(
            key_list(1500),
            |_batch| {
                *calls.borrow_mut() += 1;
                let fail = *calls.borrow() == 2;
                async move {
                    if fail {
                        Err(StoreError::Transient("batch refused".into()))
                    } else {
                        Ok(())
                    }
                }
            },
            |key| forgotten.borrow_mut().push(key.to_string()),
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
        // Only the confirmed first batch was purged.
        assert_eq!(forgotten.borrow().len(), 1000);
    }

    #[tokio::test]
    async fn empty_key_list_deletes_nothing() {
        let removed = delete_in_batches(Vec::new(), |_batch| async { Ok(()) }, |_key| {})
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    fn file_entry(key: &str) -> RemoteEntry {
        RemoteEntry {
            name: leaf_name(key),
            key: key.to_string(),
            is_directory: false,
            size: 1,
            last_modified: None,
            e_tag: None,
            original_hash: None,
        }
    }

    #[test]
    fn recursive_listings_order_by_full_key() {
        let files = vec![
            file_entry("cars/b/a.txt"),
            file_entry("cars/a/z.txt"),
            file_entry("cars/a/b.txt"),
        ];
        let ordered = order_listing(Vec::new(), files);
        let keys: Vec<_> = ordered.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["cars/a/b.txt", "cars/a/z.txt", "cars/b/a.txt"]);
    }

    #[test]
    fn delimited_listings_put_directories_first() {
        let directories = vec![
            RemoteEntry::directory("cars/b/"),
            RemoteEntry::directory("cars/a/"),
        ];
        let files = vec![file_entry("cars/readme.txt")];
        let ordered = order_listing(directories, files);
        let keys: Vec<_> = ordered.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["cars/a/", "cars/b/", "cars/readme.txt"]);
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("cars/gt3/setup.ini"), "text/plain");
        assert_eq!(content_type_for("manifest.yaml"), "application/yaml");
        assert_eq!(content_type_for("preview.PNG"), "image/png");
        assert_eq!(content_type_for("model.kn5"), "application/octet-stream");
    }
}
