use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::{BlobBackend, RestoreStatus};
use crate::error::{BackendError, BackendResult};

#[derive(Debug)]
struct PendingRestore {
    key: String,
    polls_left: u32,
    failure: Option<String>,
}

/// In-memory blob backend.
///
/// Intended for tests and embedding. Built with [`archival`], it behaves
/// like a cold tier: `get` is refused, and each restore completes after a
/// fixed number of status polls.
///
/// [`archival`]: InMemoryBackend::archival
pub struct InMemoryBackend {
    name: String,
    objects: RwLock<HashMap<String, Bytes>>,
    restore_polls: Option<u32>,
    restores: RwLock<HashMap<String, PendingRestore>>,
    restores_started: AtomicUsize,
    fail_next: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(HashMap::new()),
            restore_polls: None,
            restores: RwLock::new(HashMap::new()),
            restores_started: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// An archival backend whose restores finish after `polls` status checks.
    pub fn archival(name: impl Into<String>, polls: u32) -> Self {
        Self {
            restore_polls: Some(polls),
            ..Self::new(name)
        }
    }

    /// Make the next `count` calls fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make an in-flight restore report failure on its next poll.
    pub fn fail_restore(&self, handle: &str, reason: impl Into<String>) {
        if let Ok(mut restores) = self.restores.write() {
            if let Some(job) = restores.get_mut(handle) {
                job.failure = Some(reason.into());
            }
        }
    }

    /// Number of restores started so far.
    pub fn restores_started(&self) -> usize {
        self.restores_started.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enter(&self) -> BackendResult<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> BackendError {
        BackendError::Unavailable(format!("lock poisoned: {e}"))
    }
}

#[async_trait]
impl BlobBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, data: Bytes) -> BackendResult<()> {
        self.enter()?;
        let mut objects = self.objects.write().map_err(Self::poisoned)?;
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Bytes> {
        self.enter()?;
        if self.restore_polls.is_some() {
            return Err(BackendError::Unavailable(format!(
                "{key} is archived; restore it first"
            )));
        }
        let objects = self.objects.read().map_err(Self::poisoned)?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        self.enter()?;
        let objects = self.objects.read().map_err(Self::poisoned)?;
        Ok(objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.enter()?;
        let mut objects = self.objects.write().map_err(Self::poisoned)?;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        self.enter()?;
        let objects = self.objects.read().map_err(Self::poisoned)?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn requires_restore(&self) -> bool {
        self.restore_polls.is_some()
    }

    async fn start_restore(&self, key: &str, _days: u32) -> BackendResult<String> {
        self.enter()?;
        let Some(polls) = self.restore_polls else {
            return Err(BackendError::RestoreNotSupported);
        };
        if !self.objects.read().map_err(Self::poisoned)?.contains_key(key) {
            return Err(BackendError::NotFound(key.to_string()));
        }
        let handle = uuid::Uuid::new_v4().to_string();
        self.restores.write().map_err(Self::poisoned)?.insert(
            handle.clone(),
            PendingRestore {
                key: key.to_string(),
                polls_left: polls,
                failure: None,
            },
        );
        self.restores_started.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn restore_status(&self, handle: &str) -> BackendResult<RestoreStatus> {
        self.enter()?;
        let mut restores = self.restores.write().map_err(Self::poisoned)?;
        let job = restores
            .get_mut(handle)
            .ok_or_else(|| BackendError::UnknownRestore(handle.to_string()))?;
        if let Some(reason) = &job.failure {
            return Ok(RestoreStatus::Failed(reason.clone()));
        }
        if job.polls_left == 0 {
            return Ok(RestoreStatus::Completed);
        }
        job.polls_left -= 1;
        Ok(if job.polls_left == 0 {
            RestoreStatus::Completed
        } else {
            RestoreStatus::InProgress
        })
    }

    async fn restore_output(&self, handle: &str) -> BackendResult<Bytes> {
        self.enter()?;
        let key = {
            let restores = self.restores.read().map_err(Self::poisoned)?;
            let job = restores
                .get(handle)
                .ok_or_else(|| BackendError::UnknownRestore(handle.to_string()))?;
            if job.polls_left > 0 || job.failure.is_some() {
                return Err(BackendError::Unavailable(format!(
                    "restore {handle} has not completed"
                )));
            }
            job.key.clone()
        };
        let objects = self.objects.read().map_err(Self::poisoned)?;
        objects
            .get(&key)
            .cloned()
            .ok_or(BackendError::NotFound(key))
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("name", &self.name)
            .field("archival", &self.restore_polls.is_some())
            .field("objects", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let backend = InMemoryBackend::new("hot");
        backend.put("a/1", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(backend.get("a/1").await.unwrap(), Bytes::from_static(b"x"));
        assert!(backend.exists("a/1").await.unwrap());
        backend.delete("a/1").await.unwrap();
        assert!(matches!(
            backend.delete("a/1").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let backend = InMemoryBackend::new("hot");
        for key in ["org1/aa", "org1/bb", "org2/aa"] {
            backend.put(key, Bytes::new()).await.unwrap();
        }
        let mut keys = backend.list("org1/").await.unwrap();
        keys.sort();
        assert_eq!(keys, ["org1/aa", "org1/bb"]);
    }

    #[tokio::test]
    async fn archival_restore_completes_after_polls() {
        let backend = InMemoryBackend::archival("archive", 2);
        backend.put("k", Bytes::from_static(b"cold")).await.unwrap();
        assert!(backend.get("k").await.is_err());

        let handle = backend.start_restore("k", 1).await.unwrap();
        assert!(backend.restore_output(&handle).await.is_err());
        assert_eq!(
            backend.restore_status(&handle).await.unwrap(),
            RestoreStatus::InProgress
        );
        assert_eq!(
            backend.restore_status(&handle).await.unwrap(),
            RestoreStatus::Completed
        );
        assert_eq!(
            backend.restore_output(&handle).await.unwrap(),
            Bytes::from_static(b"cold")
        );
        assert_eq!(backend.restores_started(), 1);
    }

    #[tokio::test]
    async fn hot_backend_has_no_restores() {
        let backend = InMemoryBackend::new("hot");
        assert!(!backend.requires_restore());
        assert!(matches!(
            backend.start_restore("k", 1).await,
            Err(BackendError::RestoreNotSupported)
        ));
    }

    #[tokio::test]
    async fn injected_failures() {
        let backend = InMemoryBackend::new("hot");
        backend.fail_next(1);
        assert!(matches!(
            backend.put("k", Bytes::new()).await,
            Err(BackendError::Unavailable(_))
        ));
        backend.put("k", Bytes::new()).await.unwrap();
    }
}
