//! Durable queue of reference-count tasks.

use chrono::{DateTime, Utc};
use strata_store::{Family, StoreError, Tables, MAX_CAS_ATTEMPTS};
use strata_types::{LibraryId, OrgId, RefCountConfig};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{GcError, GcResult};
use crate::task::{RefCountTask, TaskOp};

/// Partition of the `Tasks` family that holds reference-count work.
pub const REFCOUNT_QUEUE: &str = "refcount";

/// Reference-count tasks stored as rows of the `Tasks` family.
///
/// A worker claims a task by writing a lease into its row with
/// compare-and-set. Every later write by that worker (checkpoint, complete,
/// fail) first checks it still owns the lease, so a worker whose lease ran
/// out cannot clobber the one that took over.
#[derive(Clone, Debug)]
pub struct TaskQueue {
    tables: Tables,
    config: RefCountConfig,
}

impl TaskQueue {
    pub fn new(tables: Tables, config: &RefCountConfig) -> Self {
        Self {
            tables,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &RefCountConfig {
        &self.config
    }

    #[tracing::instrument(skip(self), fields(%org, %library))]
    pub async fn enqueue(
        &self,
        org: &OrgId,
        library: &LibraryId,
        op: TaskOp,
    ) -> GcResult<RefCountTask> {
        let task = RefCountTask::new(*org, *library, op);
        if !self
            .tables
            .insert(Family::Tasks, REFCOUNT_QUEUE, &task.key(), &task)
            .await?
        {
            return Err(StoreError::Contended {
                key: format!("{}/{REFCOUNT_QUEUE}/{}", Family::Tasks, task.id),
                attempts: 1,
            }
            .into());
        }
        debug!(task = %task.id, ?op, "enqueued refcount task");
        Ok(task)
    }

    pub async fn get(&self, id: &Uuid) -> GcResult<Option<RefCountTask>> {
        Ok(self
            .tables
            .get(Family::Tasks, REFCOUNT_QUEUE, &id.to_string())
            .await?)
    }

    /// Lease up to `limit` due tasks for `worker`, in key order.
    ///
    /// Tasks another worker grabbed between the scan and the lease write are
    /// skipped.
    pub async fn claim_due(
        &self,
        worker: Uuid,
        now: DateTime<Utc>,
        limit: usize,
    ) -> GcResult<Vec<RefCountTask>> {
        let rows = self
            .tables
            .scan::<RefCountTask>(Family::Tasks, REFCOUNT_QUEUE)
            .await?;
        let lease_until = now + span(self.config.lease());

        let mut claimed = Vec::new();
        for (key, row) in rows {
            if claimed.len() >= limit {
                break;
            }
            if !row.value.is_claimable(now) {
                continue;
            }
            let mut task = row.value.clone();
            task.lease_owner = Some(worker);
            task.lease_until = Some(lease_until);
            if self
                .tables
                .cas(Family::Tasks, REFCOUNT_QUEUE, &key, &row, &task)
                .await?
            {
                claimed.push(task);
            } else {
                debug!(%key, "task claimed elsewhere");
            }
        }
        Ok(claimed)
    }

    /// Persist the task's expansion progress and extend its lease.
    pub async fn checkpoint(
        &self,
        task: &RefCountTask,
        now: DateTime<Utc>,
    ) -> GcResult<RefCountTask> {
        let lease_until = now + span(self.config.lease());
        self.tables
            .modify::<RefCountTask, GcError, _>(Family::Tasks, REFCOUNT_QUEUE, &task.key(), |row| {
                if row.lease_owner != task.lease_owner {
                    return Err(GcError::LeaseLost(task.id));
                }
                row.expansion = task.expansion.clone();
                row.lease_until = Some(lease_until);
                Ok(true)
            })
            .await?
            .ok_or(GcError::TaskNotFound(task.id))
    }

    /// Remove a finished task.
    pub async fn complete(&self, task: &RefCountTask) -> GcResult<()> {
        let key = task.key();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(row) = self
                .tables
                .get_row::<RefCountTask>(Family::Tasks, REFCOUNT_QUEUE, &key)
                .await?
            else {
                warn!(task = %task.id, "completed task already gone");
                return Ok(());
            };
            if row.value.lease_owner != task.lease_owner {
                return Err(GcError::LeaseLost(task.id));
            }
            if self
                .tables
                .delete_if(Family::Tasks, REFCOUNT_QUEUE, &key, &row)
                .await?
            {
                debug!(task = %task.id, "task completed");
                return Ok(());
            }
        }
        Err(StoreError::Contended {
            key: format!("{}/{REFCOUNT_QUEUE}/{key}", Family::Tasks),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    /// Record a failed attempt and release the lease.
    ///
    /// The task becomes due again after the backoff for its attempt count,
    /// or is dead-lettered once `max_attempts` is reached. The checkpointed
    /// expansion in the row is kept as is.
    pub async fn fail(
        &self,
        task: &RefCountTask,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GcResult<RefCountTask> {
        let config = &self.config;
        let failed = self
            .tables
            .modify::<RefCountTask, GcError, _>(Family::Tasks, REFCOUNT_QUEUE, &task.key(), |row| {
                if row.lease_owner != task.lease_owner {
                    return Err(GcError::LeaseLost(task.id));
                }
                row.attempts += 1;
                row.last_error = Some(reason.to_string());
                row.lease_owner = None;
                row.lease_until = None;
                if row.attempts >= config.max_attempts {
                    row.dead = true;
                } else {
                    row.not_before = now + span(config.backoff(row.attempts));
                }
                Ok(true)
            })
            .await?
            .ok_or(GcError::TaskNotFound(task.id))?;

        if failed.dead {
            error!(task = %failed.id, attempts = failed.attempts, reason, "refcount task dead-lettered");
        } else {
            warn!(task = %failed.id, attempts = failed.attempts, retry_at = %failed.not_before, reason, "refcount task failed");
        }
        Ok(failed)
    }

    /// Tasks that ran out of attempts.
    pub async fn list_dead(&self) -> GcResult<Vec<RefCountTask>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|t| t.dead)
            .collect())
    }

    /// Number of live (not dead-lettered) tasks.
    pub async fn pending(&self) -> GcResult<usize> {
        Ok(self.all().await?.iter().filter(|t| !t.dead).count())
    }

    /// Put a dead-lettered task back in the queue with a fresh attempt count.
    pub async fn revive(&self, id: &Uuid) -> GcResult<RefCountTask> {
        let now = Utc::now();
        let task = self
            .tables
            .modify::<RefCountTask, GcError, _>(Family::Tasks, REFCOUNT_QUEUE, &id.to_string(), |row| {
                if !row.dead {
                    return Ok(false);
                }
                row.dead = false;
                row.attempts = 0;
                row.not_before = now;
                Ok(true)
            })
            .await?
            .ok_or(GcError::TaskNotFound(*id))?;
        info!(task = %id, "refcount task revived");
        Ok(task)
    }

    async fn all(&self) -> GcResult<Vec<RefCountTask>> {
        Ok(self
            .tables
            .scan::<RefCountTask>(Family::Tasks, REFCOUNT_QUEUE)
            .await?
            .into_iter()
            .map(|(_, row)| row.into_value())
            .collect())
    }
}

pub(crate) fn span(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
