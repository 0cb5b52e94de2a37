use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_crypto::ContentHasher;
use strata_store::{Family, Tables};
use strata_types::{BlockId, OrgId, StorageClass};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::RestoreStatus;
use crate::error::{BackendError, BlockError, BlockResult};
use crate::record::blob_key;
use crate::store::BlockStore;

/// Lifecycle of a restore job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    /// Persisted, backend restore not yet started.
    Pending,
    /// Backend restore started; `handle` is set.
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RestoreState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Durable record of one archival restore, keyed by block within its org.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreJob {
    pub job_id: Uuid,
    pub org: OrgId,
    pub block_id: BlockId,
    /// Backend-issued restore handle.
    pub handle: Option<String>,
    pub state: RestoreState,
    pub polls: u32,
    pub error: Option<String>,
    /// Tier and key the block was restored from. The copy there is deleted
    /// once the block row points at the hot tier.
    #[serde(default)]
    pub source_class: Option<StorageClass>,
    #[serde(default)]
    pub source_locator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Drives archival restores as resumable background jobs.
///
/// A request persists a job and starts the backend restore. [`run_job`]
/// polls the backend until it reports completion, then copies the bytes
/// into the hot tier and repoints the block row there. A shutdown through
/// the cancellation token leaves the job in progress so
/// [`resume_pending`] can pick it up with the same backend handle.
///
/// [`run_job`]: RestoreManager::run_job
/// [`resume_pending`]: RestoreManager::resume_pending
#[derive(Clone, Debug)]
pub struct RestoreManager {
    blocks: BlockStore,
    tables: Tables,
    poll_interval: Duration,
    restore_days: u32,
}

impl RestoreManager {
    pub fn new(blocks: BlockStore, tables: Tables) -> Self {
        let restore = &blocks.config().restore;
        let poll_interval = restore.poll_interval();
        let restore_days = restore.restore_days;
        Self {
            blocks,
            tables,
            poll_interval,
            restore_days,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Persist a restore job for an archived block and start the backend
    /// restore. An unfinished job for the same block is returned as is.
    #[tracing::instrument(skip(self), fields(%org))]
    pub async fn request(&self, org: &OrgId, id: &BlockId) -> BlockResult<RestoreJob> {
        let record = self.blocks.stat(org, id).await?;
        let backend = self.blocks.backends().get(record.storage_class)?;
        if !backend.requires_restore() {
            return Err(BlockError::InvalidArgument(format!(
                "block {id} is in {} storage and needs no restore",
                record.storage_class
            )));
        }

        let partition = org.to_string();
        let key = id.to_hex();
        let now = Utc::now();
        let job = RestoreJob {
            job_id: Uuid::new_v4(),
            org: *org,
            block_id: *id,
            handle: None,
            state: RestoreState::Pending,
            polls: 0,
            error: None,
            source_class: Some(record.storage_class),
            source_locator: Some(record.locator.clone()),
            created_at: now,
            updated_at: now,
        };

        if !self
            .tables
            .insert(Family::RestoreJobs, &partition, &key, &job)
            .await?
        {
            let existing = self
                .tables
                .get_row::<RestoreJob>(Family::RestoreJobs, &partition, &key)
                .await?
                .ok_or(BlockError::JobNotFound(*id))?;
            if !existing.value.state.is_terminal() {
                return Ok(existing.into_value());
            }
            if !self
                .tables
                .cas(Family::RestoreJobs, &partition, &key, &existing, &job)
                .await?
            {
                return self.job(org, id).await;
            }
        }

        info!(job = %job.job_id, block = %id, "restore requested");
        self.start(job).await
    }

    /// Current state of the restore job for a block.
    pub async fn job(&self, org: &OrgId, id: &BlockId) -> BlockResult<RestoreJob> {
        self.tables
            .get(Family::RestoreJobs, &org.to_string(), &id.to_hex())
            .await?
            .ok_or(BlockError::JobNotFound(*id))
    }

    /// Poll a job until it finishes or `cancel` fires.
    ///
    /// Cancellation returns [`BlockError::Cancelled`] and leaves the job
    /// resumable.
    #[tracing::instrument(skip(self, cancel), fields(%org))]
    pub async fn run_job(
        &self,
        org: &OrgId,
        id: &BlockId,
        cancel: &CancellationToken,
    ) -> BlockResult<RestoreJob> {
        let mut job = self.job(org, id).await?;
        if job.state.is_terminal() {
            return Ok(job);
        }
        if job.handle.is_none() {
            job = self.start(job).await?;
        }

        loop {
            if cancel.is_cancelled() {
                return Err(BlockError::Cancelled);
            }
            let Some(handle) = job.handle.clone() else {
                return Err(BlockError::JobNotFound(*id));
            };
            let record = self.blocks.stat(org, id).await?;
            let backend = self.blocks.backends().get(record.storage_class)?;
            if !backend.requires_restore() {
                // Already copied by an earlier run that died before saving.
                self.discard_source(&job).await;
                return self.finish(job, RestoreState::Completed, None).await;
            }

            let status = self
                .blocks
                .call(backend.as_ref(), "restore_status", backend.restore_status(&handle))
                .await?;
            job = self
                .update(org, id, |j| {
                    j.polls += 1;
                    true
                })
                .await?;
            if job.state.is_terminal() {
                info!(block = %id, state = ?job.state, "restore ended elsewhere");
                return Ok(job);
            }

            match status {
                RestoreStatus::Completed => {
                    let data = self
                        .blocks
                        .call(backend.as_ref(), "restore_output", backend.restore_output(&handle))
                        .await?;
                    if !ContentHasher::verify_block(&data, id) {
                        let reason = "restored bytes do not match block id".to_string();
                        self.finish(job, RestoreState::Failed, Some(reason.clone()))
                            .await?;
                        return Err(BlockError::Corrupt { id: *id, reason });
                    }

                    let hot = self.blocks.backends().get(StorageClass::Hot)?;
                    let locator = blob_key(org, id);
                    self.blocks
                        .call(hot.as_ref(), "put", hot.put(&locator, data))
                        .await?;
                    self.blocks
                        .relocate(org, id, StorageClass::Hot, &locator)
                        .await?;
                    self.discard_source(&job).await;
                    info!(block = %id, polls = job.polls, "restore completed");
                    return self.finish(job, RestoreState::Completed, None).await;
                }
                RestoreStatus::Failed(reason) => {
                    warn!(block = %id, %reason, "backend restore failed");
                    self.finish(job, RestoreState::Failed, Some(reason.clone()))
                        .await?;
                    return Err(BlockError::RestoreFailed { id: *id, reason });
                }
                RestoreStatus::InProgress => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BlockError::Cancelled),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Mark a job cancelled so nothing resumes it. A run polling the job
    /// stops at its next poll.
    pub async fn cancel(&self, org: &OrgId, id: &BlockId) -> BlockResult<RestoreJob> {
        let job = self.job(org, id).await?;
        if job.state.is_terminal() {
            return Ok(job);
        }
        self.finish(job, RestoreState::Cancelled, None).await
    }

    /// Run every unfinished job of every org to completion, one at a time.
    ///
    /// Per-job failures are logged; the returned list holds the jobs as they
    /// ended. Stops early with `Cancelled` when the token fires.
    pub async fn resume_pending(&self, cancel: &CancellationToken) -> BlockResult<Vec<RestoreJob>> {
        let mut finished = Vec::new();
        for partition in self.tables.partitions(Family::RestoreJobs).await? {
            let rows = self
                .tables
                .scan::<RestoreJob>(Family::RestoreJobs, &partition)
                .await?;
            for (_, row) in rows {
                let job = row.into_value();
                if job.state.is_terminal() {
                    continue;
                }
                info!(job = %job.job_id, block = %job.block_id, "resuming restore");
                match self.run_job(&job.org, &job.block_id, cancel).await {
                    Ok(done) => finished.push(done),
                    Err(BlockError::Cancelled) => return Err(BlockError::Cancelled),
                    Err(e) => {
                        warn!(block = %job.block_id, error = %e, "restore did not complete");
                        finished.push(self.job(&job.org, &job.block_id).await?);
                    }
                }
            }
        }
        Ok(finished)
    }

    async fn start(&self, job: RestoreJob) -> BlockResult<RestoreJob> {
        let record = self.blocks.stat(&job.org, &job.block_id).await?;
        let backend = self.blocks.backends().get(record.storage_class)?;
        let handle = self
            .blocks
            .call(
                backend.as_ref(),
                "start_restore",
                backend.start_restore(&record.locator, self.restore_days),
            )
            .await?;
        self.update(&job.org, &job.block_id, |j| {
            if j.state.is_terminal() {
                return false;
            }
            j.handle = Some(handle.clone());
            j.state = RestoreState::InProgress;
            true
        })
        .await
    }

    /// Delete the archived copy of a block that now lives in the hot tier.
    /// A failure leaves the bytes behind and is logged.
    async fn discard_source(&self, job: &RestoreJob) {
        let (Some(class), Some(locator)) = (job.source_class, job.source_locator.as_deref()) else {
            return;
        };
        if class == StorageClass::Hot {
            return;
        }
        let deleted = match self.blocks.backends().get(class) {
            Ok(backend) => self
                .blocks
                .call(backend.as_ref(), "delete", backend.delete(locator))
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
        match deleted {
            Ok(()) => debug!(block = %job.block_id, %class, "archived copy deleted"),
            Err(e) => {
                warn!(block = %job.block_id, %class, %locator, error = %e, "archived copy left behind")
            }
        }
    }

    async fn finish(
        &self,
        job: RestoreJob,
        state: RestoreState,
        error: Option<String>,
    ) -> BlockResult<RestoreJob> {
        // A job that already ended keeps its outcome.
        self.update(&job.org, &job.block_id, |j| {
            if j.state.is_terminal() {
                return false;
            }
            j.state = state;
            j.error = error.clone();
            true
        })
        .await
    }

    /// Edit the job row; `edit` returns `false` to leave it unchanged.
    async fn update<F>(&self, org: &OrgId, id: &BlockId, mut edit: F) -> BlockResult<RestoreJob>
    where
        F: FnMut(&mut RestoreJob) -> bool,
    {
        self.tables
            .modify::<RestoreJob, BlockError, _>(
                Family::RestoreJobs,
                &org.to_string(),
                &id.to_hex(),
                |j| {
                    if !edit(j) {
                        return Ok(false);
                    }
                    j.updated_at = Utc::now();
                    Ok(true)
                },
            )
            .await?
            .ok_or(BlockError::JobNotFound(*id))
    }
}
