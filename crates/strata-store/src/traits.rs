use async_trait::async_trait;

use crate::error::StoreResult;

/// Column families (tables) of the metadata store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    /// Library rows, partitioned by org.
    Libraries,
    /// Commit records, partitioned by library.
    Commits,
    /// Directory and file nodes, partitioned by library.
    Nodes,
    /// Block metadata rows, partitioned by org.
    Blocks,
    /// Durable background tasks, partitioned by queue name.
    Tasks,
    /// Archival restore jobs, partitioned by org.
    RestoreJobs,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Libraries => "libraries",
            Self::Commits => "commits",
            Self::Nodes => "nodes",
            Self::Blocks => "blocks",
            Self::Tasks => "tasks",
            Self::RestoreJobs => "restore_jobs",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column-family metadata store.
///
/// Rows are addressed by `(family, partition, key)` and hold opaque bytes.
/// Implementations must satisfy these invariants:
/// - Every operation touches exactly one row, except `scan` and `partitions`.
///   No multi-row atomicity is assumed anywhere in Strata.
/// - Conditional operations (`put_if_absent`, `compare_and_set`, `delete_if`)
///   are atomic for their single row (e.g. lightweight transactions).
/// - All backend errors are propagated, never silently ignored.
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Read one row. Returns `Ok(None)` if it does not exist.
    async fn get(&self, family: Family, partition: &str, key: &str)
        -> StoreResult<Option<Vec<u8>>>;

    /// Unconditionally write one row.
    async fn put(&self, family: Family, partition: &str, key: &str, value: Vec<u8>)
        -> StoreResult<()>;

    /// Write one row only if it does not yet exist. Returns `true` if written.
    async fn put_if_absent(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        value: Vec<u8>,
    ) -> StoreResult<bool>;

    /// Replace a row only if its current bytes equal `expected`.
    /// Returns `true` if the swap happened.
    async fn compare_and_set(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> StoreResult<bool>;

    /// Delete a row only if its current bytes equal `expected`.
    async fn delete_if(
        &self,
        family: Family,
        partition: &str,
        key: &str,
        expected: &[u8],
    ) -> StoreResult<bool>;

    /// Unconditionally delete a row. Returns `true` if it existed.
    async fn delete(&self, family: Family, partition: &str, key: &str) -> StoreResult<bool>;

    /// All rows of one partition, ordered by key.
    async fn scan(&self, family: Family, partition: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// All partition keys present in a family. Intended for offline sweeps.
    async fn partitions(&self, family: Family) -> StoreResult<Vec<String>>;

    /// Read several rows of one partition.
    ///
    /// Default implementation calls `get()` for each key. Backends may
    /// override with a single round-trip.
    async fn get_many(
        &self,
        family: Family,
        partition: &str,
        keys: &[String],
    ) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(family, partition, key).await?);
        }
        Ok(out)
    }
}
