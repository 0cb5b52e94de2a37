//! Reference-count task rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_types::{BlockId, LibraryId, NodeId, OrgId};
use uuid::Uuid;

/// What a task does to the blocks under one subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskOp {
    /// Add one reference per file occurrence under `root`.
    Retain { root: NodeId, stats: bool },
    /// Drop one reference per file occurrence under `root`.
    Release { root: NodeId, stats: bool },
}

impl TaskOp {
    pub fn root(&self) -> NodeId {
        match self {
            Self::Retain { root, .. } | Self::Release { root, .. } => *root,
        }
    }

    /// Whether the expanded size and file count go to the library row.
    pub fn adjusts_stats(&self) -> bool {
        match self {
            Self::Retain { stats, .. } | Self::Release { stats, .. } => *stats,
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, Self::Release { .. })
    }
}

/// The subtree flattened into the block list the task applies.
///
/// `cursor` counts the blocks already applied and checkpointed. It only
/// moves forward.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expansion {
    pub blocks: Vec<BlockId>,
    pub size: u64,
    pub files: u64,
    pub cursor: usize,
    pub stats_applied: bool,
}

impl Expansion {
    pub fn remaining(&self) -> &[BlockId] {
        &self.blocks[self.cursor.min(self.blocks.len())..]
    }

    pub fn is_applied(&self) -> bool {
        self.cursor >= self.blocks.len()
    }
}

/// A durable unit of deferred reference-count work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCountTask {
    /// v7, so keys sort roughly by creation time.
    pub id: Uuid,
    pub org: OrgId,
    pub library: LibraryId,
    pub op: TaskOp,
    pub expansion: Option<Expansion>,
    pub attempts: u32,
    pub not_before: DateTime<Utc>,
    pub lease_owner: Option<Uuid>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead: bool,
    pub created_at: DateTime<Utc>,
}

impl RefCountTask {
    pub fn new(org: OrgId, library: LibraryId, op: TaskOp) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            org,
            library,
            op,
            expansion: None,
            attempts: 0,
            not_before: now,
            lease_owner: None,
            lease_until: None,
            last_error: None,
            dead: false,
            created_at: now,
        }
    }

    /// Due and not held by a live lease.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.dead
            && self.not_before <= now
            && self.lease_until.map_or(true, |until| until <= now)
    }

    pub(crate) fn key(&self) -> String {
        self.id.to_string()
    }
}
