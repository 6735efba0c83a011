//! Freshness decision for a remote object against its local copy.
//!
//! One function decides staleness for both the downloader and the
//! orchestrator so the two can never disagree. Precedence:
//!
//! 1. forced sync → stale
//! 2. local file missing → stale
//! 3. recorded pre-compression hash → compare SHA-256 of the local file
//! 4. plain (non-multipart) ETag → compare MD5 of the local file
//! 5. otherwise → compare size, then modification time in whole seconds

use std::path::{Path, PathBuf};

use tracing::debug;

use paddock_store::digest;
use paddock_store::{LocalEntry, RemoteEntry};

/// Maps an object key to its place under the local base directory.
pub fn local_path_for_key(base: &Path, key: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in key.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// True when the ETag is the MD5 of the object body: a single-part upload
/// yields a bare 32-digit hex ETag, while multipart ETags carry a `-`.
fn is_plain_etag(e_tag: &str) -> bool {
    e_tag.len() == 32 && e_tag.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decides whether `remote` must be (re-)downloaded over the file at
/// `local`. Unreadable local files count as stale rather than erroring.
pub async fn is_stale(remote: &RemoteEntry, local: &Path, force: bool) -> bool {
    if force {
        return true;
    }
    let local_entry = match LocalEntry::from_path(local) {
        Ok(entry) => entry,
        Err(_) => return true,
    };

    if let Some(expected) = &remote.original_hash {
        return match digest::sha256_file(local).await {
            Ok(actual) => &actual != expected,
            Err(_) => true,
        };
    }

    if let Some(e_tag) = remote.e_tag.as_deref().filter(|t| is_plain_etag(t)) {
        return match digest::md5_file(local).await {
            Ok(actual) => actual != e_tag,
            Err(_) => true,
        };
    }

    if local_entry.size != remote.size {
        return true;
    }
    match (remote.last_modified, local_entry.modified) {
        (Some(remote_s), Some(local_s)) => {
            if remote_s != local_s {
                debug!(key = %remote.key, remote_s, local_s, "mtime drift, marking stale");
                true
            } else {
                false
            }
        }
        // Without both timestamps the size match is the best signal left.
        _ => false,
    }
}

/// Checks a local file against an optional expected SHA-256. Returns true
/// when there is nothing to check; read failures count as invalid, not as
/// errors.
pub async fn validate_file(path: &Path, expected_hash: Option<&str>) -> bool {
    let Some(expected) = expected_hash else {
        return true;
    };
    match digest::sha256_file(path).await {
        Ok(actual) => actual == expected,
        Err(_) => false,
    }
}
