use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_types::StoreConfig;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ColumnStore, Family};

/// Attempts a read-modify-write loop makes before reporting contention.
pub const MAX_CAS_ATTEMPTS: u32 = 32;

/// A decoded row plus the exact bytes it was read from.
///
/// The raw bytes are the compare-and-set token: a conditional write built
/// from a `Row` only succeeds if nobody rewrote the row in between.
#[derive(Clone, Debug)]
pub struct Row<T> {
    pub value: T,
    raw: Vec<u8>,
}

impl<T> Row<T> {
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Typed, deadline-bounded access to a [`ColumnStore`].
///
/// Rows are JSON documents. Every backend call runs under the configured
/// call timeout; an elapsed deadline becomes [`StoreError::Timeout`].
#[derive(Clone)]
pub struct Tables {
    store: Arc<dyn ColumnStore>,
    timeout: Duration,
}

impl Tables {
    pub fn new(store: Arc<dyn ColumnStore>, config: &StoreConfig) -> Self {
        Self::with_timeout(store, config.call_timeout())
    }

    pub fn with_timeout(store: Arc<dyn ColumnStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn ColumnStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one backend call under the call deadline.
    pub async fn bounded<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, after_ms = self.timeout.as_millis() as u64, "metadata call timed out");
                Err(StoreError::Timeout {
                    op,
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn get_row<T: DeserializeOwned>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
    ) -> StoreResult<Option<Row<T>>> {
        let raw = self
            .bounded("get", self.store.get(family, partition, key))
            .await?;
        raw.map(|raw| decode(family, key, raw)).transpose()
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        Ok(self
            .get_row(family, partition, key)
            .await?
            .map(Row::into_value))
    }

    /// Write a row only if absent. Returns `true` if this call created it.
    pub async fn insert<T: Serialize>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        value: &T,
    ) -> StoreResult<bool> {
        let bytes = encode(value)?;
        self.bounded(
            "put_if_absent",
            self.store.put_if_absent(family, partition, key, bytes),
        )
        .await
    }

    pub async fn put<T: Serialize>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let bytes = encode(value)?;
        self.bounded("put", self.store.put(family, partition, key, bytes))
            .await
    }

    /// Replace `current` with `value` if the row is still byte-identical.
    pub async fn cas<T: Serialize>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        current: &Row<T>,
        value: &T,
    ) -> StoreResult<bool> {
        let bytes = encode(value)?;
        self.bounded(
            "compare_and_set",
            self.store
                .compare_and_set(family, partition, key, &current.raw, bytes),
        )
        .await
    }

    pub async fn delete_if<T>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        current: &Row<T>,
    ) -> StoreResult<bool> {
        self.bounded(
            "delete_if",
            self.store.delete_if(family, partition, key, &current.raw),
        )
        .await
    }

    pub async fn delete(&self, family: Family, partition: &str, key: &str) -> StoreResult<bool> {
        self.bounded("delete", self.store.delete(family, partition, key))
            .await
    }

    pub async fn scan<T: DeserializeOwned>(
        &self,
        family: Family,
        partition: &str,
    ) -> StoreResult<Vec<(String, Row<T>)>> {
        let rows = self
            .bounded("scan", self.store.scan(family, partition))
            .await?;
        rows.into_iter()
            .map(|(key, raw)| {
                let row = decode(family, &key, raw)?;
                Ok((key, row))
            })
            .collect()
    }

    pub async fn partitions(&self, family: Family) -> StoreResult<Vec<String>> {
        self.bounded("partitions", self.store.partitions(family))
            .await
    }

    /// Read-modify-write one row with compare-and-set, retrying on races.
    ///
    /// `f` edits the value in place and returns whether anything changed;
    /// unchanged values are not written back. Returns `Ok(None)` if the row
    /// does not exist, otherwise the value as finally stored.
    pub async fn modify<T, E, F>(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        mut f: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned + Clone,
        E: From<StoreError>,
        F: FnMut(&mut T) -> Result<bool, E>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(row) = self.get_row::<T>(family, partition, key).await? else {
                return Ok(None);
            };
            let mut next = row.value.clone();
            if !f(&mut next)? {
                return Ok(Some(next));
            }
            if self.cas(family, partition, key, &row, &next).await? {
                return Ok(Some(next));
            }
            tracing::debug!(%family, partition, key, attempt, "row changed underneath, retrying");
        }
        Err(StoreError::Contended {
            key: format!("{family}/{partition}/{key}"),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }
}

impl std::fmt::Debug for Tables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tables")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(family: Family, key: &str, raw: Vec<u8>) -> StoreResult<Row<T>> {
    let value = serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
        key: format!("{family}/{key}"),
        reason: e.to_string(),
    })?;
    Ok(Row { value, raw })
}
