//! Tree-level diff between two roots of one library.
//!
//! Subtrees with equal ids are skipped without being loaded, so the cost
//! follows the size of the change rather than the size of the library.

use std::collections::{BTreeMap, HashSet};

use strata_store::{DirEntry, EntryMode, ObjectStore};
use strata_types::{LibraryId, NodeId};

use crate::error::FsResult;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub changes: Vec<TreeChange>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// A single change between two trees.
///
/// Added and deleted directories are reported once, at the top of the
/// subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeChange {
    Added {
        path: String,
        id: NodeId,
        mode: EntryMode,
    },
    Deleted {
        path: String,
        id: NodeId,
        mode: EntryMode,
    },
    /// A file's content changed.
    Modified {
        path: String,
        old_id: NodeId,
        new_id: NodeId,
    },
    /// The same node left one path and appeared at another.
    Renamed {
        old_path: String,
        new_path: String,
        id: NodeId,
        mode: EntryMode,
    },
}

impl TreeChange {
    /// The path a reader of the new tree would look at.
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Deleted { path, .. } | Self::Modified { path, .. } => {
                path
            }
            Self::Renamed { new_path, .. } => new_path,
        }
    }
}

/// Compare the trees under `old_root` and `new_root`.
pub async fn diff_trees(
    objects: &ObjectStore,
    library: &LibraryId,
    old_root: NodeId,
    new_root: NodeId,
) -> FsResult<TreeDiff> {
    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let mut changes = Vec::new();

    let mut pending = vec![(String::new(), old_root, new_root)];
    while let Some((prefix, old_id, new_id)) = pending.pop() {
        if old_id == new_id {
            continue;
        }
        let old = entries_by_name(objects, library, &old_id).await?;
        let new = entries_by_name(objects, library, &new_id).await?;

        for (name, old_entry) in &old {
            let path = format!("{prefix}/{name}");
            match new.get(name) {
                None => deleted.push((path, old_entry.id, old_entry.mode)),
                Some(new_entry) if new_entry.id == old_entry.id => {}
                Some(new_entry) => match (old_entry.is_dir(), new_entry.is_dir()) {
                    (true, true) => pending.push((path, old_entry.id, new_entry.id)),
                    (false, false) => changes.push(TreeChange::Modified {
                        path,
                        old_id: old_entry.id,
                        new_id: new_entry.id,
                    }),
                    _ => {
                        deleted.push((path.clone(), old_entry.id, old_entry.mode));
                        added.push((path, new_entry.id, new_entry.mode));
                    }
                },
            }
        }
        for (name, new_entry) in &new {
            if !old.contains_key(name) {
                added.push((format!("{prefix}/{name}"), new_entry.id, new_entry.mode));
            }
        }
    }

    // Pair deletions with additions of the same node as renames.
    let mut matched = HashSet::new();
    for (old_path, id, mode) in deleted {
        let partner = added
            .iter()
            .enumerate()
            .find(|(i, (_, aid, amode))| !matched.contains(i) && *aid == id && *amode == mode)
            .map(|(i, _)| i);
        match partner {
            Some(i) => {
                matched.insert(i);
                changes.push(TreeChange::Renamed {
                    old_path,
                    new_path: added[i].0.clone(),
                    id,
                    mode,
                });
            }
            None => changes.push(TreeChange::Deleted {
                path: old_path,
                id,
                mode,
            }),
        }
    }
    for (i, (path, id, mode)) in added.into_iter().enumerate() {
        if !matched.contains(&i) {
            changes.push(TreeChange::Added { path, id, mode });
        }
    }

    changes.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(TreeDiff { changes })
}

async fn entries_by_name(
    objects: &ObjectStore,
    library: &LibraryId,
    id: &NodeId,
) -> FsResult<BTreeMap<String, DirEntry>> {
    Ok(objects
        .get_dir(library, id)
        .await?
        .into_entries()
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_store::{InMemoryColumnStore, Tables};
    use strata_types::StoreConfig;

    fn store() -> (ObjectStore, LibraryId) {
        let tables = Tables::new(Arc::new(InMemoryColumnStore::new()), &StoreConfig::default());
        (ObjectStore::new(tables), LibraryId::new())
    }

    async fn file(objects: &ObjectStore, lib: &LibraryId, size: u64) -> NodeId {
        objects.put_file(lib, "f", size, Vec::new()).await.unwrap()
    }

    #[tokio::test]
    async fn identical_roots_have_no_changes() {
        let (objects, lib) = store();
        let root = ObjectStore::empty_dir_id();
        assert!(diff_trees(&objects, &lib, root, root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_to_populated_is_all_additions() {
        let (objects, lib) = store();
        let f = file(&objects, &lib, 1).await;
        let sub = objects.put_dir(&lib, vec![DirEntry::file("inner", f, 1, 0)]).await.unwrap();
        let root = objects
            .put_dir(&lib, vec![DirEntry::file("a", f, 1, 0), DirEntry::dir("d", sub, 0)])
            .await
            .unwrap();

        let diff = diff_trees(&objects, &lib, ObjectStore::empty_dir_id(), root).await.unwrap();
        assert_eq!(diff.len(), 2);
        assert!(diff.changes.iter().all(|c| matches!(c, TreeChange::Added { .. })));
        assert_eq!(diff.changes[1].path(), "/d");
    }

    #[tokio::test]
    async fn nested_modification_recurses() {
        let (objects, lib) = store();
        let v1 = file(&objects, &lib, 1).await;
        let v2 = file(&objects, &lib, 2).await;
        let keep = file(&objects, &lib, 3).await;
        let old_sub = objects.put_dir(&lib, vec![DirEntry::file("x", v1, 1, 0)]).await.unwrap();
        let new_sub = objects.put_dir(&lib, vec![DirEntry::file("x", v2, 2, 0)]).await.unwrap();
        let old = objects
            .put_dir(&lib, vec![DirEntry::dir("d", old_sub, 0), DirEntry::file("k", keep, 3, 0)])
            .await
            .unwrap();
        let new = objects
            .put_dir(&lib, vec![DirEntry::dir("d", new_sub, 0), DirEntry::file("k", keep, 3, 0)])
            .await
            .unwrap();

        let diff = diff_trees(&objects, &lib, old, new).await.unwrap();
        assert_eq!(
            diff.changes,
            vec![TreeChange::Modified {
                path: "/d/x".into(),
                old_id: v1,
                new_id: v2
            }]
        );
    }

    #[tokio::test]
    async fn moves_across_directories_are_renames() {
        let (objects, lib) = store();
        let f = file(&objects, &lib, 4).await;
        let full = objects.put_dir(&lib, vec![DirEntry::file("f", f, 4, 0)]).await.unwrap();
        let empty = ObjectStore::empty_dir_id();
        let old = objects
            .put_dir(&lib, vec![DirEntry::dir("a", full, 0), DirEntry::dir("b", empty, 0)])
            .await
            .unwrap();
        let new = objects
            .put_dir(&lib, vec![DirEntry::dir("a", empty, 0), DirEntry::dir("b", full, 0)])
            .await
            .unwrap();

        let diff = diff_trees(&objects, &lib, old, new).await.unwrap();
        assert_eq!(
            diff.changes,
            vec![TreeChange::Renamed {
                old_path: "/a/f".into(),
                new_path: "/b/f".into(),
                id: f,
                mode: EntryMode::File
            }]
        );
    }

    #[tokio::test]
    async fn kind_change_is_delete_plus_add() {
        let (objects, lib) = store();
        let f = file(&objects, &lib, 1).await;
        let old = objects.put_dir(&lib, vec![DirEntry::file("n", f, 1, 0)]).await.unwrap();
        let new = objects
            .put_dir(&lib, vec![DirEntry::dir("n", ObjectStore::empty_dir_id(), 0)])
            .await
            .unwrap();
        let diff = diff_trees(&objects, &lib, old, new).await.unwrap();
        assert_eq!(diff.len(), 2);
        assert!(diff.changes.iter().any(|c| matches!(c, TreeChange::Deleted { mode: EntryMode::File, .. })));
        assert!(diff.changes.iter().any(|c| matches!(c, TreeChange::Added { mode: EntryMode::Directory, .. })));
    }
}
