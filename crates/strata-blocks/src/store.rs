use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use strata_crypto::ContentHasher;
use strata_store::{Family, StoreError, Tables};
use strata_types::{BlockId, OrgId, StorageClass, StoreConfig};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::BlobBackend;
use crate::error::{BackendError, BackendResult, BlockError, BlockResult};
use crate::record::{blob_key, BlockRecord};
use crate::registry::BackendRegistry;

/// Minimum age of `last_accessed` before a read rewrites it.
const TOUCH_INTERVAL_SECS: i64 = 60;

/// Result of storing one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutOutcome {
    pub id: BlockId,
    pub size: u64,
    /// `true` if the content was already stored and only its count moved.
    pub deduplicated: bool,
    pub ref_count: u64,
}

/// Direction of a queued reference-count change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountChange {
    Retain,
    Release,
}

/// Result of one sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub bytes_freed: u64,
    /// Rows removed whose bytes could not be deleted from the backend.
    pub orphaned: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.bytes_freed += other.bytes_freed;
        self.orphaned += other.orphaned;
    }
}

/// Deduplicating block storage with per-org reference counts.
///
/// Block rows live in the `Blocks` family partitioned by org; bytes live in
/// the backend registered for the row's storage class. Counts move only
/// through single-row compare-and-set, and no call here deletes bytes
/// except [`sweep`](Self::sweep).
#[derive(Clone, Debug)]
pub struct BlockStore {
    tables: Tables,
    backends: Arc<BackendRegistry>,
    config: Arc<StoreConfig>,
}

impl BlockStore {
    pub fn new(tables: Tables, backends: Arc<BackendRegistry>, config: Arc<StoreConfig>) -> Self {
        Self {
            tables,
            backends,
            config,
        }
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn exists(&self, org: &OrgId, id: &BlockId) -> BlockResult<bool> {
        Ok(self
            .tables
            .get::<BlockRecord>(Family::Blocks, &org.to_string(), &id.to_hex())
            .await?
            .is_some())
    }

    /// Existence check for many ids with bounded fan-out.
    ///
    /// At most `min(concurrency, max_check_concurrency)` lookups run at once.
    #[tracing::instrument(skip(self, ids), fields(%org, count = ids.len()))]
    pub async fn check_many_parallel(
        &self,
        org: &OrgId,
        ids: &[BlockId],
        concurrency: usize,
    ) -> BlockResult<HashMap<BlockId, bool>> {
        let limits = &self.config.dedup;
        if ids.len() > limits.max_check_batch {
            return Err(BlockError::InvalidArgument(format!(
                "{} ids exceeds the batch limit of {}",
                ids.len(),
                limits.max_check_batch
            )));
        }
        let width = concurrency.clamp(1, limits.max_check_concurrency);

        let results: Vec<BlockResult<(BlockId, bool)>> = stream::iter(ids.iter().copied())
            .map(|id| async move { self.exists(org, &id).await.map(|found| (id, found)) })
            .buffer_unordered(width)
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Store a block, deduplicating by content hash.
    ///
    /// The hash is always computed here; `claimed` only lets a client learn
    /// early that its id is wrong. The caller's reference is counted: new
    /// content starts at one, known content is incremented.
    #[tracing::instrument(skip(self, data), fields(%org, size = data.len()))]
    pub async fn put(
        &self,
        org: &OrgId,
        data: Bytes,
        claimed: Option<BlockId>,
        class: Option<StorageClass>,
    ) -> BlockResult<PutOutcome> {
        self.store(org, data, claimed, class, true).await
    }

    /// Store a block without taking a reference.
    ///
    /// This is the upload path for content a commit will link: the file
    /// that names the block retains it once the commit lands. New content
    /// starts at zero and known content at zero gets a fresh `zero_since`,
    /// so the grace period covers the gap until the link.
    #[tracing::instrument(skip(self, data), fields(%org, size = data.len()))]
    pub async fn stage(
        &self,
        org: &OrgId,
        data: Bytes,
        claimed: Option<BlockId>,
        class: Option<StorageClass>,
    ) -> BlockResult<PutOutcome> {
        self.store(org, data, claimed, class, false).await
    }

    async fn store(
        &self,
        org: &OrgId,
        data: Bytes,
        claimed: Option<BlockId>,
        class: Option<StorageClass>,
        counted: bool,
    ) -> BlockResult<PutOutcome> {
        let id = ContentHasher::block_id(&data);
        if let Some(claimed) = claimed {
            if claimed != id {
                return Err(BlockError::HashMismatch {
                    claimed,
                    actual: id,
                });
            }
        }
        let size = data.len() as u64;

        if let Some(record) = self.claim_existing(org, &id, counted).await? {
            debug!(%id, ref_count = record.ref_count, "deduplicated block");
            return Ok(PutOutcome {
                id,
                size,
                deduplicated: true,
                ref_count: record.ref_count,
            });
        }

        // Write then link: bytes land before the row that makes them visible.
        let class = class.unwrap_or(self.config.default_storage_class);
        let backend = self.backends.get(class)?;
        let locator = blob_key(org, &id);
        self.call(backend.as_ref(), "put", backend.put(&locator, data))
            .await?;

        let now = Utc::now();
        let record = BlockRecord {
            id,
            size,
            storage_class: class,
            locator,
            ref_count: u64::from(counted),
            zero_since: (!counted).then_some(now),
            created_at: now,
            last_accessed: now,
            task_marks: BTreeMap::new(),
        };
        if self
            .tables
            .insert(Family::Blocks, &org.to_string(), &id.to_hex(), &record)
            .await?
        {
            info!(%id, %class, size, "stored new block");
            return Ok(PutOutcome {
                id,
                size,
                deduplicated: false,
                ref_count: record.ref_count,
            });
        }

        // A concurrent upload of the same content linked first.
        match self.claim_existing(org, &id, counted).await? {
            Some(record) => Ok(PutOutcome {
                id,
                size,
                deduplicated: true,
                ref_count: record.ref_count,
            }),
            None => Err(StoreError::Contended {
                key: id.to_hex(),
                attempts: 2,
            }
            .into()),
        }
    }

    /// Read a block's bytes and verify them against the id.
    #[tracing::instrument(skip(self), fields(%org))]
    pub async fn get(&self, org: &OrgId, id: &BlockId) -> BlockResult<Bytes> {
        let partition = org.to_string();
        let row = self
            .tables
            .get_row::<BlockRecord>(Family::Blocks, &partition, &id.to_hex())
            .await?
            .ok_or(BlockError::NotFound(*id))?;
        let record = &row.value;

        let backend = self.backends.get(record.storage_class)?;
        if backend.requires_restore() {
            return Err(BlockError::RestoreRequired {
                id: *id,
                class: record.storage_class,
            });
        }
        let data = self
            .call(backend.as_ref(), "get", backend.get(&record.locator))
            .await?;
        if !ContentHasher::verify_block(&data, id) {
            error!(%id, locator = %record.locator, "block bytes do not match their id");
            return Err(BlockError::Corrupt {
                id: *id,
                reason: format!("content hashes to {}", ContentHasher::block_id(&data)),
            });
        }

        let now = Utc::now();
        if (now - record.last_accessed).num_seconds() >= TOUCH_INTERVAL_SECS {
            let mut touched = record.clone();
            touched.last_accessed = now;
            if let Err(e) = self
                .tables
                .cas(Family::Blocks, &partition, &id.to_hex(), &row, &touched)
                .await
            {
                debug!(%id, error = %e, "last-accessed touch failed");
            }
        }
        Ok(data)
    }

    /// The metadata row of a block.
    pub async fn stat(&self, org: &OrgId, id: &BlockId) -> BlockResult<BlockRecord> {
        self.tables
            .get(Family::Blocks, &org.to_string(), &id.to_hex())
            .await?
            .ok_or(BlockError::NotFound(*id))
    }

    /// Add one reference to each id. Missing blocks are logged and skipped.
    /// Returns how many rows were updated.
    pub async fn increment_ref_counts(&self, org: &OrgId, ids: &[BlockId]) -> BlockResult<usize> {
        let mut updated = 0;
        for id in ids {
            match self.retain(org, id).await? {
                Some(_) => updated += 1,
                None => warn!(%org, %id, "increment for unknown block"),
            }
        }
        Ok(updated)
    }

    /// Drop one reference from each id, flooring at zero.
    ///
    /// A count reaching zero stamps `zero_since`; bytes stay until a sweep
    /// finds the grace period has passed.
    pub async fn decrement_ref_counts(&self, org: &OrgId, ids: &[BlockId]) -> BlockResult<usize> {
        let partition = org.to_string();
        let mut updated = 0;
        for id in ids {
            let now = Utc::now();
            let result = self
                .tables
                .modify::<BlockRecord, BlockError, _>(Family::Blocks, &partition, &id.to_hex(), |r| {
                    if r.ref_count == 0 {
                        warn!(%id, "decrement of block already at zero");
                        return Ok(false);
                    }
                    r.ref_count -= 1;
                    if r.ref_count == 0 {
                        r.zero_since = Some(now);
                    }
                    Ok(true)
                })
                .await?;
            match result {
                Some(_) => updated += 1,
                None => warn!(%org, %id, "decrement for unknown block"),
            }
        }
        Ok(updated)
    }

    /// Apply one slice of a queued task's block list.
    ///
    /// `ids[i]` sits at position `start + i` of task `task`'s list. Each row
    /// records the highest position it took from each task, so replaying a
    /// slice that partly landed moves no count twice. Missing blocks are
    /// logged and skipped. Returns how many rows changed.
    pub async fn apply_task_counts(
        &self,
        org: &OrgId,
        task: Uuid,
        start: u64,
        ids: &[BlockId],
        change: CountChange,
    ) -> BlockResult<usize> {
        let partition = org.to_string();
        let retention = chrono::Duration::from_std(self.config.refcount.mark_retention())
            .map_err(|e| BlockError::InvalidArgument(format!("mark retention: {e}")))?;
        let mut changed = 0;
        for (position, id) in (start..).zip(ids) {
            let now = Utc::now();
            let mut applied = false;
            let result = self
                .tables
                .modify::<BlockRecord, BlockError, _>(Family::Blocks, &partition, &id.to_hex(), |r| {
                    applied = false;
                    if r.has_applied(&task, position) {
                        return Ok(false);
                    }
                    r.prune_marks(now - retention);
                    match change {
                        CountChange::Retain => {
                            r.ref_count += 1;
                            r.zero_since = None;
                        }
                        CountChange::Release if r.ref_count == 0 => {
                            warn!(%id, %task, "release of block already at zero");
                        }
                        CountChange::Release => {
                            r.ref_count -= 1;
                            if r.ref_count == 0 {
                                r.zero_since = Some(now);
                            }
                        }
                    }
                    r.task_marks.insert(task, position);
                    applied = true;
                    Ok(true)
                })
                .await?;
            match result {
                Some(_) if applied => changed += 1,
                Some(_) => debug!(%id, %task, position, "already applied"),
                None => warn!(%org, %id, "count change for unknown block"),
            }
        }
        Ok(changed)
    }

    /// Delete every block of `org` that has sat at zero past the grace period.
    ///
    /// The row goes first, conditioned on its unchanged bytes, so a block
    /// revived in the meantime survives. Bytes are deleted after.
    #[tracing::instrument(skip(self), fields(%org))]
    pub async fn sweep(&self, org: &OrgId, now: DateTime<Utc>) -> BlockResult<SweepReport> {
        let partition = org.to_string();
        let grace = chrono::Duration::from_std(self.config.retention.block_grace())
            .map_err(|e| BlockError::InvalidArgument(format!("grace period: {e}")))?;
        let rows = self
            .tables
            .scan::<BlockRecord>(Family::Blocks, &partition)
            .await?;

        let mut report = SweepReport {
            scanned: rows.len(),
            ..SweepReport::default()
        };
        for (key, row) in rows {
            if !row.value.is_reclaimable(now, grace) {
                continue;
            }
            if !self
                .tables
                .delete_if(Family::Blocks, &partition, &key, &row)
                .await?
            {
                debug!(%key, "block changed during sweep, kept");
                continue;
            }
            let record = row.into_value();
            report.deleted += 1;
            report.bytes_freed += record.size;

            let deleted = match self.backends.get(record.storage_class) {
                Ok(backend) => self
                    .call(backend.as_ref(), "delete", backend.delete(&record.locator))
                    .await
                    .or_else(|e| match e {
                        BlockError::Backend {
                            source: BackendError::NotFound(_),
                            ..
                        } => Ok(()),
                        other => Err(other),
                    }),
                Err(e) => Err(e),
            };
            if let Err(e) = deleted {
                report.orphaned += 1;
                error!(id = %record.id, locator = %record.locator, error = %e, "block bytes orphaned");
            }
        }

        if report.deleted > 0 {
            info!(
                deleted = report.deleted,
                bytes_freed = report.bytes_freed,
                "swept unreferenced blocks"
            );
        }
        Ok(report)
    }

    /// Sweep every org that has block rows.
    pub async fn sweep_all(&self, now: DateTime<Utc>) -> BlockResult<SweepReport> {
        let mut total = SweepReport::default();
        for partition in self.tables.partitions(Family::Blocks).await? {
            let org = OrgId::parse(&partition).map_err(|e| StoreError::Corrupt {
                key: format!("{}/{partition}", Family::Blocks),
                reason: e.to_string(),
            })?;
            total.absorb(self.sweep(&org, now).await?);
        }
        Ok(total)
    }

    /// Point a block row at a new tier and key.
    pub(crate) async fn relocate(
        &self,
        org: &OrgId,
        id: &BlockId,
        class: StorageClass,
        locator: &str,
    ) -> BlockResult<BlockRecord> {
        self.tables
            .modify::<BlockRecord, BlockError, _>(
                Family::Blocks,
                &org.to_string(),
                &id.to_hex(),
                |r| {
                    if r.storage_class == class && r.locator == locator {
                        return Ok(false);
                    }
                    r.storage_class = class;
                    r.locator = locator.to_string();
                    Ok(true)
                },
            )
            .await?
            .ok_or(BlockError::NotFound(*id))
    }

    /// Link an upload to an existing row: a counted upload takes a
    /// reference, an uncounted one only restarts the grace period of a row
    /// at zero.
    async fn claim_existing(
        &self,
        org: &OrgId,
        id: &BlockId,
        counted: bool,
    ) -> BlockResult<Option<BlockRecord>> {
        if counted {
            return self.retain(org, id).await;
        }
        let now = Utc::now();
        self.tables
            .modify::<BlockRecord, BlockError, _>(
                Family::Blocks,
                &org.to_string(),
                &id.to_hex(),
                |r| {
                    if r.ref_count > 0 {
                        return Ok(false);
                    }
                    r.zero_since = Some(now);
                    Ok(true)
                },
            )
            .await
    }

    async fn retain(&self, org: &OrgId, id: &BlockId) -> BlockResult<Option<BlockRecord>> {
        self.tables
            .modify::<BlockRecord, BlockError, _>(
                Family::Blocks,
                &org.to_string(),
                &id.to_hex(),
                |r| {
                    r.ref_count += 1;
                    r.zero_since = None;
                    Ok(true)
                },
            )
            .await
    }

    /// Run one backend call under the call deadline.
    pub(crate) async fn call<T, F>(
        &self,
        backend: &dyn BlobBackend,
        op: &'static str,
        fut: F,
    ) -> BlockResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        let timeout: Duration = self.config.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(BlockError::Backend {
                backend: backend.name().to_string(),
                source,
            }),
            Err(_) => {
                warn!(backend = backend.name(), op, "blob call timed out");
                Err(BlockError::Timeout {
                    op,
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
