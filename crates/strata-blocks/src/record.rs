use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_types::{BlockId, OrgId, StorageClass};
use uuid::Uuid;

/// Metadata row of one stored block, partitioned by org.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub size: u64,
    pub storage_class: StorageClass,
    /// Key of the bytes in the class's backend.
    pub locator: String,
    pub ref_count: u64,
    /// When `ref_count` last dropped to zero. Cleared on any increment.
    pub zero_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Highest block-list position each recent ref-count task has applied
    /// to this row.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub task_marks: BTreeMap<Uuid, u64>,
}

impl BlockRecord {
    /// Whether `task` already applied its change at `position`. Positions
    /// of one task are applied in increasing order.
    pub fn has_applied(&self, task: &Uuid, position: u64) -> bool {
        self.task_marks.get(task).is_some_and(|&seen| seen >= position)
    }

    /// Drop marks of tasks created before `horizon`.
    pub fn prune_marks(&mut self, horizon: DateTime<Utc>) {
        let cutoff = horizon.timestamp();
        self.task_marks.retain(|task, _| {
            task.get_timestamp()
                .map_or(true, |ts| i64::try_from(ts.to_unix().0).unwrap_or(i64::MAX) >= cutoff)
        });
    }

    /// Whether the sweeper may delete this block at `now`.
    pub fn is_reclaimable(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.ref_count == 0 && self.zero_since.is_some_and(|since| since + grace <= now)
    }
}

/// Backend key for a block: `<org>/<first two hex>/<rest>`.
pub fn blob_key(org: &OrgId, id: &BlockId) -> String {
    let hex = id.to_hex();
    format!("{org}/{}/{}", &hex[..2], &hex[2..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ref_count: u64, zero_since: Option<DateTime<Utc>>) -> BlockRecord {
        let now = Utc::now();
        BlockRecord {
            id: BlockId::from_hash([0xab; 32]),
            size: 1,
            storage_class: StorageClass::Hot,
            locator: "k".into(),
            ref_count,
            zero_since,
            created_at: now,
            last_accessed: now,
            task_marks: BTreeMap::new(),
        }
    }

    #[test]
    fn reclaimable_only_after_grace() {
        let grace = chrono::Duration::hours(1);
        let since = Utc::now();
        let zero = record(0, Some(since));

        assert!(!zero.is_reclaimable(since + chrono::Duration::minutes(59), grace));
        assert!(zero.is_reclaimable(since + grace, grace));
        assert!(!record(1, Some(since)).is_reclaimable(since + grace * 2, grace));
        assert!(!record(0, None).is_reclaimable(since + grace * 2, grace));
    }

    #[test]
    fn marks_cover_earlier_positions_only() {
        let task = Uuid::now_v7();
        let mut r = record(1, None);
        assert!(!r.has_applied(&task, 0));
        r.task_marks.insert(task, 4);
        assert!(r.has_applied(&task, 0));
        assert!(r.has_applied(&task, 4));
        assert!(!r.has_applied(&task, 5));
        assert!(!r.has_applied(&Uuid::now_v7(), 0));
    }

    #[test]
    fn old_marks_are_pruned() {
        let task = Uuid::now_v7();
        let mut r = record(1, None);
        r.task_marks.insert(task, 1);
        r.prune_marks(Utc::now() - chrono::Duration::days(1));
        assert_eq!(r.task_marks.len(), 1);
        r.prune_marks(Utc::now() + chrono::Duration::days(1));
        assert!(r.task_marks.is_empty());
    }

    #[test]
    fn key_is_sharded() {
        let org = OrgId::new();
        let key = blob_key(&org, &BlockId::from_hash([0xab; 32]));
        assert!(key.starts_with(&format!("{org}/ab/abab")));
        assert_eq!(key.len(), org.to_string().len() + 1 + 2 + 1 + 62);
    }
}
