//! Upload retry queue.
//!
//! An upload that fails transiently is not retried inline: the caller parks
//! it here and awaits a completion signal while a dedicated worker task
//! drives retries. The worker owns a min-heap ordered by eligible-at, so
//! "one sweep at a time" is a single-consumer property rather than a lock.
//! Each drain retries an item exactly once; renewed transient failure
//! re-queues it with an exponentially growing delay until the attempt
//! ceiling, at which point the waiting caller gets a permanent failure.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Timing and ceiling knobs for the retry queue. Production uses the
/// defaults; tests shrink the delay to milliseconds.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay before the first retry; later retries wait `base × 2^attempts`.
    pub base_delay: Duration,
    /// Total attempts including the caller's inline one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Payload of a queued upload.
#[derive(Clone, Debug)]
pub enum UploadPayload {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A failed upload awaiting retry.
#[derive(Clone, Debug)]
pub struct QueuedUpload {
    pub bucket: String,
    pub key: String,
    pub payload: UploadPayload,
    pub metadata: Option<HashMap<String, String>>,
    /// Attempts made so far, counting the caller's inline one.
    pub attempts: u32,
}

/// Performs one upload attempt for the worker. Implemented by the client
/// core; tests substitute scripted fakes.
#[async_trait]
pub trait RetryUploader: Send + Sync {
    async fn retry_upload(&self, upload: &QueuedUpload) -> StoreResult<()>;
}

struct QueueSlot {
    eligible_at: Instant,
    upload: QueuedUpload,
    done: oneshot::Sender<StoreResult<()>>,
}

// BinaryHeap is a max-heap; order slots so the earliest deadline surfaces.
impl Ord for QueueSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        other.eligible_at.cmp(&self.eligible_at)
    }
}

impl PartialOrd for QueueSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueSlot {
    fn eq(&self, other: &Self) -> bool {
        self.eligible_at == other.eligible_at
    }
}

impl Eq for QueueSlot {}

/// Handle to the retry worker.
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<QueueSlot>,
    depth: Arc<AtomicUsize>,
}

impl RetryQueue {
    /// Spawns the worker task. Must be called within a Tokio runtime.
    pub fn start(uploader: Arc<dyn RetryUploader>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(rx, uploader, policy, Arc::clone(&depth)));
        Self { tx, depth }
    }

    /// Parks a transiently failed upload and waits for the worker to
    /// resolve it, successfully or with a permanent failure.
    pub async fn park(&self, upload: QueuedUpload, first_delay: Duration) -> StoreResult<()> {
        let key = upload.key.clone();
        let done_rx = self.submit(upload, first_delay)?;
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(StoreError::S3(format!(
                "retry worker dropped upload of {key}"
            ))),
        }
    }

    /// Parks an upload without awaiting it; the returned channel yields the
    /// outcome once the worker resolves the item.
    pub fn submit(
        &self,
        upload: QueuedUpload,
        first_delay: Duration,
    ) -> StoreResult<oneshot::Receiver<StoreResult<()>>> {
        let key = upload.key.clone();
        let (done, done_rx) = oneshot::channel();
        let slot = QueueSlot {
            eligible_at: Instant::now() + first_delay,
            upload,
            done,
        };
        self.depth.fetch_add(1, AtomicOrdering::SeqCst);
        if self.tx.send(slot).is_err() {
            self.depth.fetch_sub(1, AtomicOrdering::SeqCst);
            return Err(StoreError::S3(format!(
                "retry worker unavailable for {key}"
            )));
        }
        Ok(done_rx)
    }

    /// Number of uploads currently awaiting retry.
    pub fn depth(&self) -> usize {
        self.depth.load(AtomicOrdering::SeqCst)
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<QueueSlot>,
    uploader: Arc<dyn RetryUploader>,
    policy: RetryPolicy,
    depth: Arc<AtomicUsize>,
) {
    let mut queue: BinaryHeap<QueueSlot> = BinaryHeap::new();
    loop {
        let next_deadline = queue.peek().map(|slot| slot.eligible_at);
        match next_deadline {
            None => match rx.recv().await {
                Some(slot) => queue.push(slot),
                None => break,
            },
            Some(deadline) => {
                tokio::select! {
                    incoming = rx.recv() => {
                        match incoming {
                            Some(slot) => queue.push(slot),
                            // All senders gone; give eligible items one last
                            // attempt, then resolve the rest terminally so
                            // nobody's backoff is collapsed into a hot loop.
                            None => {
                                drain_eligible(&mut queue, &uploader, &policy, &depth).await;
                                resolve_remaining(&mut queue, &depth);
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        drain_eligible(&mut queue, &uploader, &policy, &depth).await;
                    }
                }
            }
        }
    }
    debug!("upload retry worker stopped");
}

/// Retries every eligible item exactly once. The heap is time-ordered, so
/// the drain stops at the first item whose deadline has not passed.
async fn drain_eligible(
    queue: &mut BinaryHeap<QueueSlot>,
    uploader: &Arc<dyn RetryUploader>,
    policy: &RetryPolicy,
    depth: &Arc<AtomicUsize>,
) {
    let started = Instant::now();
    while let Some(slot) = queue.peek() {
        if slot.eligible_at > started {
            break;
        }
        let mut slot = match queue.pop() {
            Some(slot) => slot,
            None => break,
        };
        slot.upload.attempts += 1;
        let attempts = slot.upload.attempts;
        match uploader.retry_upload(&slot.upload).await {
            Ok(()) => {
                depth.fetch_sub(1, AtomicOrdering::SeqCst);
                debug!(
                    key = %slot.upload.key,
                    attempts,
                    "queued upload succeeded on retry"
                );
                let _ = slot.done.send(Ok(()));
            }
            Err(err) if err.is_transient() && attempts < policy.max_attempts => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempts);
                warn!(
                    key = %slot.upload.key,
                    attempts,
                    ?delay,
                    "queued upload failed transiently, re-queueing"
                );
                slot.eligible_at = Instant::now() + delay;
                queue.push(slot);
            }
            Err(err) => {
                depth.fetch_sub(1, AtomicOrdering::SeqCst);
                warn!(key = %slot.upload.key, attempts, error = %err, "abandoning queued upload");
                let _ = slot.done.send(Err(StoreError::UploadFailed {
                    key: slot.upload.key.clone(),
                    attempts,
                    message: err.to_string(),
                }));
            }
        }
    }
}

/// Shutdown path: items still waiting out their backoff get a terminal
/// failure at their current attempt count instead of a rushed retry.
fn resolve_remaining(queue: &mut BinaryHeap<QueueSlot>, depth: &Arc<AtomicUsize>) {
    while let Some(slot) = queue.pop() {
        depth.fetch_sub(1, AtomicOrdering::SeqCst);
        warn!(key = %slot.upload.key, "retry worker stopping with upload unresolved");
        let _ = slot.done.send(Err(StoreError::UploadFailed {
            key: slot.upload.key.clone(),
            attempts: slot.upload.attempts,
            message: "retry worker shut down".to_string(),
        }));
    }
}
