use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BackendError, BackendResult};

/// Progress of an archival restore as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreStatus {
    InProgress,
    Completed,
    Failed(String),
}

/// Blob storage for block bytes.
///
/// A backend stores opaque values under string keys. It knows nothing about
/// block ids or reference counts; [`BlockStore`](crate::BlockStore) owns the
/// key layout and all metadata.
///
/// Archival backends return `true` from [`requires_restore`] and implement
/// the restore methods. Their objects cannot be read directly: a restore is
/// started, polled until it completes, and its output read once.
///
/// [`requires_restore`]: BlobBackend::requires_restore
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn put(&self, key: &str, data: Bytes) -> BackendResult<()>;

    async fn get(&self, key: &str) -> BackendResult<Bytes>;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Delete an object. Deleting a missing key is `BackendError::NotFound`.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// All keys starting with `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;

    fn requires_restore(&self) -> bool {
        false
    }

    /// Begin restoring `key`, keeping the restored copy for `days`.
    /// Returns an opaque handle that survives process restarts.
    async fn start_restore(&self, _key: &str, _days: u32) -> BackendResult<String> {
        Err(BackendError::RestoreNotSupported)
    }

    async fn restore_status(&self, _handle: &str) -> BackendResult<RestoreStatus> {
        Err(BackendError::RestoreNotSupported)
    }

    /// Bytes of a completed restore.
    async fn restore_output(&self, _handle: &str) -> BackendResult<Bytes> {
        Err(BackendError::RestoreNotSupported)
    }
}
