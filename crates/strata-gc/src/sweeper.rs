//! Periodic reclamation of unreferenced blocks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use strata_blocks::{BlockStore, SweepReport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::GcResult;

/// Runs [`BlockStore::sweep_all`] on a fixed interval.
#[derive(Clone, Debug)]
pub struct Sweeper {
    blocks: BlockStore,
    interval: Duration,
}

impl Sweeper {
    pub fn new(blocks: BlockStore) -> Self {
        let interval = blocks.config().retention.sweep_interval();
        Self { blocks, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> GcResult<SweepReport> {
        Ok(self.blocks.sweep_all(now).await?)
    }

    /// Sweep, then sleep, until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "sweeper started");
        loop {
            if let Err(e) = self.run_once(Utc::now()).await {
                warn!(error = %e, "sweep pass failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("sweeper stopped");
    }
}
