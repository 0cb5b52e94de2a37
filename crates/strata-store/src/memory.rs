use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ColumnStore, Family};

type Partitions = HashMap<(Family, String), BTreeMap<String, Vec<u8>>>;

/// In-memory column store.
///
/// Intended for tests and embedding. Rows live in nested maps behind a
/// `RwLock`; conditional writes are atomic because they run under the write
/// lock. Supports injected failures and latency so callers can exercise
/// retry and deadline paths.
pub struct InMemoryColumnStore {
    rows: RwLock<Partitions>,
    fail_next: AtomicUsize,
    latency_ms: AtomicU64,
}

impl InMemoryColumnStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            fail_next: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Make the next `count` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of rows in a family across all partitions.
    pub fn row_count(&self, family: Family) -> usize {
        self.rows
            .read()
            .map(|rows| {
                rows.iter()
                    .filter(|((f, _), _)| *f == family)
                    .map(|(_, part)| part.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Overwrite a row's bytes directly, bypassing all checks. Test helper
    /// for simulating corruption.
    pub fn corrupt(&self, family: Family, partition: &str, key: &str, bytes: Vec<u8>) {
        if let Ok(mut rows) = self.rows.write() {
            rows.entry((family, partition.to_string()))
                .or_default()
                .insert(key.to_string(), bytes);
        }
    }

    async fn enter(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn read_rows(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Partitions>> {
        self.rows
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_rows(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Partitions>> {
        self.rows
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryColumnStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ColumnStore for InMemoryColumnStore {
    async fn get(&self, family: Family, partition: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.enter().await?;
        let rows = self.read_rows()?;
        Ok(rows
            .get(&(family, partition.to_string()))
            .and_then(|part| part.get(key))
            .cloned())
    }

    async fn put(&self, family: Family, partition: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.enter().await?;
        let mut rows = self.write_rows()?;
        rows.entry((family, partition.to_string()))
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        value: Vec<u8>,
    ) -> StoreResult<bool> {
        self.enter().await?;
        let mut rows = self.write_rows()?;
        let part = rows.entry((family, partition.to_string())).or_default();
        if part.contains_key(key) {
            return Ok(false);
        }
        part.insert(key.to_string(), value);
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> StoreResult<bool> {
        self.enter().await?;
        let mut rows = self.write_rows()?;
        let Some(current) = rows
            .get_mut(&(family, partition.to_string()))
            .and_then(|part| part.get_mut(key))
        else {
            return Ok(false);
        };
        if current.as_slice() != expected {
            return Ok(false);
        }
        *current = value;
        Ok(true)
    }

    async fn delete_if(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        expected: &[u8],
    ) -> StoreResult<bool> {
        self.enter().await?;
        let mut rows = self.write_rows()?;
        let Some(part) = rows.get_mut(&(family, partition.to_string())) else {
            return Ok(false);
        };
        if part.get(key).map(Vec::as_slice) != Some(expected) {
            return Ok(false);
        }
        part.remove(key);
        Ok(true)
    }

    async fn delete(&self, family: Family, partition: &str, key: &str) -> StoreResult<bool> {
        self.enter().await?;
        let mut rows = self.write_rows()?;
        Ok(rows
            .get_mut(&(family, partition.to_string()))
            .map(|part| part.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, family: Family, partition: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.enter().await?;
        let rows = self.read_rows()?;
        Ok(rows
            .get(&(family, partition.to_string()))
            .map(|part| part.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn partitions(&self, family: Family) -> StoreResult<Vec<String>> {
        self.enter().await?;
        let rows = self.read_rows()?;
        let mut out: Vec<String> = rows
            .iter()
            .filter(|((f, _), part)| *f == family && !part.is_empty())
            .map(|((_, p), _)| p.clone())
            .collect();
        out.sort();
        Ok(out)
    }
}

impl std::fmt::Debug for InMemoryColumnStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let partitions = self.rows.read().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("InMemoryColumnStore")
            .field("partition_count", &partitions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get() {
        let store = InMemoryColumnStore::new();
        store.put(Family::Nodes, "lib", "a", b"one".to_vec()).await.unwrap();
        let got = store.get(Family::Nodes, "lib", "a").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"one"[..]));
        assert!(store.get(Family::Nodes, "other", "a").await.unwrap().is_none());
        assert!(store.get(Family::Commits, "lib", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_if_absent_keeps_first_value() {
        let store = InMemoryColumnStore::new();
        assert!(store.put_if_absent(Family::Nodes, "p", "k", b"first".to_vec()).await.unwrap());
        assert!(!store.put_if_absent(Family::Nodes, "p", "k", b"second".to_vec()).await.unwrap());
        let got = store.get(Family::Nodes, "p", "k").await.unwrap().unwrap();
        assert_eq!(got, b"first");
        assert_eq!(store.row_count(Family::Nodes), 1);
    }

    #[tokio::test]
    async fn compare_and_set_requires_match() {
        let store = InMemoryColumnStore::new();
        store.put(Family::Libraries, "org", "lib", b"v1".to_vec()).await.unwrap();

        assert!(!store
            .compare_and_set(Family::Libraries, "org", "lib", b"stale", b"v2".to_vec())
            .await
            .unwrap());
        assert!(store
            .compare_and_set(Family::Libraries, "org", "lib", b"v1", b"v2".to_vec())
            .await
            .unwrap());
        assert_eq!(
            store.get(Family::Libraries, "org", "lib").await.unwrap().unwrap(),
            b"v2"
        );
    }

    #[tokio::test]
    async fn compare_and_set_on_missing_row_fails() {
        let store = InMemoryColumnStore::new();
        assert!(!store
            .compare_and_set(Family::Blocks, "org", "b", b"", b"x".to_vec())
            .await
            .unwrap());
        assert_eq!(store.row_count(Family::Blocks), 0);
    }

    #[tokio::test]
    async fn delete_if_requires_match() {
        let store = InMemoryColumnStore::new();
        store.put(Family::Blocks, "org", "b", b"zero".to_vec()).await.unwrap();
        assert!(!store.delete_if(Family::Blocks, "org", "b", b"one").await.unwrap());
        assert!(store.delete_if(Family::Blocks, "org", "b", b"zero").await.unwrap());
        assert!(!store.delete(Family::Blocks, "org", "b").await.unwrap());
    }

    #[tokio::test]
    async fn scan_is_key_ordered_and_partition_scoped() {
        let store = InMemoryColumnStore::new();
        for key in ["c", "a", "b"] {
            store.put(Family::Commits, "lib1", key, key.as_bytes().to_vec()).await.unwrap();
        }
        store.put(Family::Commits, "lib2", "z", b"z".to_vec()).await.unwrap();

        let rows = store.scan(Family::Commits, "lib1").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);

        let parts = store.partitions(Family::Commits).await.unwrap();
        assert_eq!(parts, ["lib1", "lib2"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryColumnStore::new();
        store.fail_next(2);
        assert!(store.get(Family::Nodes, "p", "k").await.is_err());
        assert!(store.put(Family::Nodes, "p", "k", vec![]).await.is_err());
        assert!(store.get(Family::Nodes, "p", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_many_preserves_order() {
        let store = InMemoryColumnStore::new();
        store.put(Family::Blocks, "org", "b", b"2".to_vec()).await.unwrap();
        let got = store
            .get_many(Family::Blocks, "org", &["a".into(), "b".into()])
            .await
            .unwrap();
        assert!(got[0].is_none());
        assert_eq!(got[1].as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn debug_format() {
        let store = InMemoryColumnStore::new();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryColumnStore"));
    }
}
