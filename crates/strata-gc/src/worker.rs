//! Applies queued reference-count tasks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use strata_blocks::{BlockStore, CountChange};
use strata_refs::{LibraryHeads, RefError, StatsDelta};
use strata_store::{Node, ObjectStore};
use strata_types::RefCountConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{GcError, GcResult};
use crate::queue::TaskQueue;
use crate::task::{Expansion, RefCountTask};

/// Outcome of one [`RefCountWorker::drain_once`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub completed: usize,
    /// Failed and rescheduled with backoff.
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Claims due tasks and applies them to block reference counts.
///
/// A task is processed in three resumable steps, each checkpointed into
/// its row:
///
/// 1. Expand the subtree into a block list. Every file occurrence
///    contributes its distinct blocks once.
/// 2. Apply the list in batches of `checkpoint_every`, moving the cursor
///    after each batch. A retry resumes at the cursor; block rows remember
///    the positions they already took from the task, so the batch in flight
///    at a failure is not applied twice.
/// 3. Apply the expanded size and file count to the library, if asked.
#[derive(Clone, Debug)]
pub struct RefCountWorker {
    id: Uuid,
    queue: TaskQueue,
    objects: ObjectStore,
    blocks: BlockStore,
    heads: LibraryHeads,
    config: RefCountConfig,
}

impl RefCountWorker {
    pub fn new(
        queue: TaskQueue,
        objects: ObjectStore,
        blocks: BlockStore,
        heads: LibraryHeads,
    ) -> Self {
        let config = queue.config().clone();
        Self {
            id: Uuid::new_v4(),
            queue,
            objects,
            blocks,
            heads,
            config,
        }
    }

    /// Lease owner id written into claimed rows.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Claim one batch of due tasks and process each of them.
    #[tracing::instrument(skip(self), fields(worker = %self.id))]
    pub async fn drain_once(&self, now: DateTime<Utc>) -> GcResult<DrainReport> {
        let tasks = self
            .queue
            .claim_due(self.id, now, self.config.claim_batch)
            .await?;
        let mut report = DrainReport {
            claimed: tasks.len(),
            ..DrainReport::default()
        };

        for task in tasks {
            match self.process(task.clone(), now).await {
                Ok(()) => report.completed += 1,
                Err(GcError::LeaseLost(id)) => {
                    warn!(task = %id, "lease lost mid-task, leaving it to the new owner");
                }
                Err(e) => match self.queue.fail(&task, &e.to_string(), now).await {
                    Ok(failed) if failed.dead => report.dead_lettered += 1,
                    Ok(_) => report.retried += 1,
                    Err(fail_err) => {
                        // The lease expires and the task is claimed again.
                        error!(task = %task.id, error = %fail_err, "could not record task failure");
                    }
                },
            }
        }
        Ok(report)
    }

    /// Poll the queue until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker = %self.id, "refcount worker started");
        while !cancel.is_cancelled() {
            let idle = match self.drain_once(Utc::now()).await {
                Ok(report) => report.claimed == 0,
                Err(e) => {
                    warn!(error = %e, "refcount drain failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }
        info!(worker = %self.id, "refcount worker stopped");
    }

    async fn process(&self, mut task: RefCountTask, now: DateTime<Utc>) -> GcResult<()> {
        let mut expansion = match task.expansion.clone() {
            Some(expansion) => expansion,
            None => {
                let expansion = self.expand(&task).await?;
                task.expansion = Some(expansion.clone());
                task = self.queue.checkpoint(&task, now).await?;
                expansion
            }
        };

        let batch = self.config.checkpoint_every.max(1);
        let change = if task.op.is_release() {
            CountChange::Release
        } else {
            CountChange::Retain
        };
        while !expansion.is_applied() {
            let end = (expansion.cursor + batch).min(expansion.blocks.len());
            let ids = &expansion.blocks[expansion.cursor..end];
            self.blocks
                .apply_task_counts(&task.org, task.id, expansion.cursor as u64, ids, change)
                .await?;
            expansion.cursor = end;
            task.expansion = Some(expansion.clone());
            task = self.queue.checkpoint(&task, now).await?;
        }

        if task.op.adjusts_stats() && !expansion.stats_applied {
            let mut delta = StatsDelta::new(to_signed(expansion.size), to_signed(expansion.files));
            if task.op.is_release() {
                delta = delta.negate();
            }
            match self.heads.adjust_stats(&task.org, &task.library, delta).await {
                Ok(_) => {}
                Err(RefError::LibraryNotFound(key)) => {
                    warn!(library = %key, "library gone, stats dropped");
                }
                Err(e) => return Err(e.into()),
            }
            expansion.stats_applied = true;
            task.expansion = Some(expansion.clone());
            task = self.queue.checkpoint(&task, now).await?;
        }

        self.queue.complete(&task).await?;
        debug!(
            task = %task.id,
            blocks = expansion.blocks.len(),
            files = expansion.files,
            "refcount task applied"
        );
        Ok(())
    }

    /// Flatten the subtree under the task's root, depth first in name order.
    async fn expand(&self, task: &RefCountTask) -> GcResult<Expansion> {
        let mut expansion = Expansion::default();
        let mut stack = vec![task.op.root()];
        while let Some(id) = stack.pop() {
            match self.objects.get(&task.library, &id).await? {
                Node::Directory(dir) => {
                    stack.extend(dir.entries().iter().rev().map(|e| e.id));
                }
                Node::File(file) => {
                    let mut seen = HashSet::new();
                    expansion
                        .blocks
                        .extend(file.block_ids().iter().filter(|b| seen.insert(**b)));
                    expansion.size += file.size();
                    expansion.files += 1;
                }
            }
        }
        Ok(expansion)
    }
}

fn to_signed(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
