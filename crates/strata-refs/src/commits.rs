//! Append-only commit chains, one per library.

use chrono::Utc;
use strata_crypto::{ContentHasher, LineageVerifier};
use strata_store::{Family, Tables};
use strata_types::{CommitId, LibraryId, NodeId};
use tracing::{debug, warn};

use crate::error::{RefError, Result};
use crate::types::Commit;

/// Fresh salts tried before giving up on an id collision.
const MAX_ID_ATTEMPTS: u32 = 3;

/// Stores commits in the `Commits` family, partitioned by library.
///
/// Commits are written once with `put_if_absent` and never change. The
/// chain is linear: each commit names at most one parent.
#[derive(Clone, Debug)]
pub struct CommitLog {
    tables: Tables,
}

impl CommitLog {
    pub fn new(tables: Tables) -> Self {
        Self { tables }
    }

    /// Record a new commit. The id is salted, so committing the same tree
    /// twice yields two distinct commits.
    #[tracing::instrument(skip(self, description), fields(%library, %root))]
    pub async fn create_commit(
        &self,
        library: &LibraryId,
        creator: &str,
        root: NodeId,
        parent: Option<CommitId>,
        description: &str,
    ) -> Result<Commit> {
        let partition = library.to_string();
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let created_at = Utc::now();
            let nanos = created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
            let commit = Commit {
                id: ContentHasher::salted_commit_id(library, creator, nanos),
                library: *library,
                root,
                parent,
                creator: creator.to_string(),
                description: description.to_string(),
                created_at,
            };
            if self
                .tables
                .insert(Family::Commits, &partition, &commit.id.to_hex(), &commit)
                .await?
            {
                debug!(id = %commit.id, "created commit");
                return Ok(commit);
            }
            warn!(id = %commit.id, attempt, "commit id collision");
        }
        Err(strata_store::StoreError::Contended {
            key: format!("{}/{partition}", Family::Commits),
            attempts: MAX_ID_ATTEMPTS,
        }
        .into())
    }

    pub async fn get_commit(&self, library: &LibraryId, id: &CommitId) -> Result<Commit> {
        self.tables
            .get(Family::Commits, &library.to_string(), &id.to_hex())
            .await?
            .ok_or(RefError::CommitNotFound {
                library: *library,
                id: *id,
            })
    }

    /// Walk parent links from `from`, newest first, returning at most
    /// `limit` commits.
    pub async fn history(
        &self,
        library: &LibraryId,
        from: &CommitId,
        limit: usize,
    ) -> Result<Vec<Commit>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }

        let mut current = self.get_commit(library, from).await?;
        loop {
            let parent = current.parent;
            let child = current.id;
            out.push(current);
            if out.len() >= limit {
                break;
            }
            let Some(parent) = parent else { break };
            current = match self.get_commit(library, &parent).await {
                Ok(commit) => commit,
                Err(RefError::CommitNotFound { .. }) => {
                    return Err(RefError::DanglingParent {
                        commit: child,
                        parent,
                    })
                }
                Err(e) => return Err(e),
            };
        }
        Ok(out)
    }

    /// Check that up to `limit` commits from `from` form one unbroken chain.
    /// Returns the number of commits verified.
    pub async fn verify_chain(
        &self,
        library: &LibraryId,
        from: &CommitId,
        limit: usize,
    ) -> Result<usize> {
        let commits = self.history(library, from, limit).await?;
        let complete = commits.len() < limit;
        LineageVerifier::verify(&commits, complete)?;
        Ok(commits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_store::{ColumnStore, InMemoryColumnStore, ObjectStore};
    use strata_types::{ErrorKind, StoreConfig};

    fn setup() -> (Arc<InMemoryColumnStore>, CommitLog) {
        let store = Arc::new(InMemoryColumnStore::new());
        let log = CommitLog::new(Tables::new(store.clone(), &StoreConfig::default()));
        (store, log)
    }

    async fn chain(log: &CommitLog, lib: &LibraryId, n: usize) -> Vec<Commit> {
        let root = ObjectStore::empty_dir_id();
        let mut out: Vec<Commit> = Vec::new();
        for i in 0..n {
            let parent = out.last().map(|c| c.id);
            out.push(
                log.create_commit(lib, "alice", root, parent, &format!("c{i}"))
                    .await
                    .unwrap(),
            );
        }
        out
    }

    #[tokio::test]
    async fn same_tree_twice_gives_distinct_commits() {
        let (_, log) = setup();
        let lib = LibraryId::new();
        let root = ObjectStore::empty_dir_id();
        let a = log.create_commit(&lib, "bob", root, None, "x").await.unwrap();
        let b = log.create_commit(&lib, "bob", root, None, "x").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(log.get_commit(&lib, &a.id).await.unwrap(), a);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let (_, log) = setup();
        let lib = LibraryId::new();
        let commits = chain(&log, &lib, 5).await;
        let head = commits[4].id;

        let all = log.history(&lib, &head, 100).await.unwrap();
        let descriptions: Vec<_> = all.iter().map(|c| c.description.as_str()).collect();
        assert_eq!(descriptions, ["c4", "c3", "c2", "c1", "c0"]);

        let recent = log.history(&lib, &head, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(log.history(&lib, &head, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_full_and_partial_chain() {
        let (_, log) = setup();
        let lib = LibraryId::new();
        let commits = chain(&log, &lib, 4).await;
        assert_eq!(log.verify_chain(&lib, &commits[3].id, 100).await.unwrap(), 4);
        assert_eq!(log.verify_chain(&lib, &commits[3].id, 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_parent_is_corruption() {
        let (store, log) = setup();
        let lib = LibraryId::new();
        let commits = chain(&log, &lib, 3).await;
        store
            .delete(Family::Commits, &lib.to_string(), &commits[1].id.to_hex())
            .await
            .unwrap();

        let err = log.verify_chain(&lib, &commits[2].id, 10).await.unwrap_err();
        assert!(matches!(err, RefError::DanglingParent { parent, .. } if parent == commits[1].id));
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[tokio::test]
    async fn unknown_commit() {
        let (_, log) = setup();
        let err = log
            .get_commit(&LibraryId::new(), &CommitId::from_hash([4; 20]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
