//! Path resolution against an immutable tree.

use strata_store::{DirEntry, Directory, ObjectStore, StoreError};
use strata_types::{LibraryId, NodeId};

use crate::entries::find_entry;
use crate::error::{FsError, FsResult};
use crate::path::FsPath;

/// One directory on the way from the root to a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ancestor {
    /// Name of this directory inside its parent; empty for the root.
    pub name: String,
    pub id: NodeId,
    pub entries: Vec<DirEntry>,
}

/// Result of walking a path from a root.
///
/// `ancestors` runs from the root to the target's immediate parent and is
/// empty when the target is the root itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTraverseResult {
    pub path: FsPath,
    /// The entry naming the target in its parent. `None` for the root.
    pub target: Option<DirEntry>,
    pub target_id: NodeId,
    pub ancestors: Vec<Ancestor>,
}

impl PathTraverseResult {
    pub fn is_root(&self) -> bool {
        self.target.is_none()
    }

    pub fn is_dir(&self) -> bool {
        self.target.as_ref().map_or(true, DirEntry::is_dir)
    }

    pub fn parent(&self) -> Option<&Ancestor> {
        self.ancestors.last()
    }
}

/// Resolves paths by loading one directory node per segment.
#[derive(Clone, Debug)]
pub struct PathResolver {
    objects: ObjectStore,
}

impl PathResolver {
    pub fn new(objects: ObjectStore) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub async fn traverse(
        &self,
        library: &LibraryId,
        root: NodeId,
        path: &FsPath,
    ) -> FsResult<PathTraverseResult> {
        let mut ancestors = Vec::with_capacity(path.depth());
        let mut target: Option<DirEntry> = None;
        let mut current = root;

        for (depth, segment) in path.segments().iter().enumerate() {
            if let Some(entry) = &target {
                if !entry.is_dir() {
                    return Err(FsError::NotADirectory(path.prefix(depth).to_string()));
                }
            }
            let dir = self.load_dir(library, &current, path, depth).await?;
            let entry = dir
                .get(segment)
                .cloned()
                .ok_or_else(|| FsError::NotFound(path.prefix(depth + 1).to_string()))?;
            ancestors.push(Ancestor {
                name: target.take().map(|e| e.name).unwrap_or_default(),
                id: current,
                entries: dir.into_entries(),
            });
            current = entry.id;
            target = Some(entry);
        }

        Ok(PathTraverseResult {
            path: path.clone(),
            target,
            target_id: current,
            ancestors,
        })
    }

    /// The chain from the root down to and including the directory at
    /// `path`.
    pub async fn open_dir(
        &self,
        library: &LibraryId,
        root: NodeId,
        path: &FsPath,
    ) -> FsResult<Vec<Ancestor>> {
        let result = self.traverse(library, root, path).await?;
        if !result.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let dir = self.load_dir(library, &result.target_id, path, path.depth()).await?;
        let mut chain = result.ancestors;
        chain.push(Ancestor {
            name: result.target.map(|e| e.name).unwrap_or_default(),
            id: result.target_id,
            entries: dir.into_entries(),
        });
        Ok(chain)
    }

    /// Follow existing directories along `path` as far as they go.
    ///
    /// Returns the chain to the deepest existing directory and the segments
    /// below it that do not exist yet.
    pub async fn open_deepest(
        &self,
        library: &LibraryId,
        root: NodeId,
        path: &FsPath,
    ) -> FsResult<(Vec<Ancestor>, Vec<String>)> {
        let mut chain = self.open_dir(library, root, &FsPath::root()).await?;
        for (depth, segment) in path.segments().iter().enumerate() {
            let Some(last) = chain.last() else { break };
            let Some(entry) = find_entry(&last.entries, segment).cloned() else {
                return Ok((chain, path.segments()[depth..].to_vec()));
            };
            if !entry.is_dir() {
                return Err(FsError::NotADirectory(path.prefix(depth + 1).to_string()));
            }
            let dir = self
                .load_dir(library, &entry.id, path, depth + 1)
                .await?;
            chain.push(Ancestor {
                name: entry.name,
                id: entry.id,
                entries: dir.into_entries(),
            });
        }
        Ok((chain, Vec::new()))
    }

    /// Load the node the tree names as a directory at the first `depth`
    /// segments of `path`.
    async fn load_dir(
        &self,
        library: &LibraryId,
        id: &NodeId,
        path: &FsPath,
        depth: usize,
    ) -> FsResult<Directory> {
        match self.objects.get_dir(library, id).await {
            Ok(dir) => Ok(dir),
            Err(StoreError::WrongKind { id, .. }) => Err(FsError::KindMismatch {
                path: path.prefix(depth).to_string(),
                id,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_store::{InMemoryColumnStore, Tables};
    use strata_types::{ErrorKind, StoreConfig};

    /// `/docs/a.txt`, `/docs/sub/`, `/top.txt`
    async fn tree() -> (PathResolver, LibraryId, NodeId) {
        let tables = Tables::new(Arc::new(InMemoryColumnStore::new()), &StoreConfig::default());
        let objects = ObjectStore::new(tables);
        let lib = LibraryId::new();
        let file = objects.put_file(&lib, "a", 3, Vec::new()).await.unwrap();
        let sub = objects.put_dir(&lib, Vec::new()).await.unwrap();
        let docs = objects
            .put_dir(
                &lib,
                vec![DirEntry::file("a.txt", file, 3, 1), DirEntry::dir("sub", sub, 1)],
            )
            .await
            .unwrap();
        let root = objects
            .put_dir(
                &lib,
                vec![DirEntry::dir("docs", docs, 1), DirEntry::file("top.txt", file, 3, 1)],
            )
            .await
            .unwrap();
        (PathResolver::new(objects), lib, root)
    }

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn root_has_no_parent() {
        let (resolver, lib, root) = tree().await;
        let result = resolver.traverse(&lib, root, &FsPath::root()).await.unwrap();
        assert!(result.is_root());
        assert!(result.parent().is_none());
        assert_eq!(result.target_id, root);
    }

    #[tokio::test]
    async fn nested_file_carries_full_chain() {
        let (resolver, lib, root) = tree().await;
        let result = resolver.traverse(&lib, root, &p("/docs/a.txt")).await.unwrap();
        let names: Vec<_> = result.ancestors.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["", "docs"]);
        assert_eq!(result.ancestors[0].id, root);
        assert_eq!(result.target.as_ref().unwrap().size, 3);
        assert!(!result.is_dir());
        assert_eq!(result.parent().unwrap().entries.len(), 2);
    }

    #[tokio::test]
    async fn walking_through_a_file_fails() {
        let (resolver, lib, root) = tree().await;
        let err = resolver.traverse(&lib, root, &p("/top.txt/x")).await.unwrap_err();
        assert!(matches!(&err, FsError::NotADirectory(path) if path == "/top.txt"));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn missing_segment_is_not_found() {
        let (resolver, lib, root) = tree().await;
        let err = resolver.traverse(&lib, root, &p("/docs/nope/x")).await.unwrap_err();
        assert!(matches!(&err, FsError::NotFound(path) if path == "/docs/nope"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn open_dir_includes_target() {
        let (resolver, lib, root) = tree().await;
        let chain = resolver.open_dir(&lib, root, &p("/docs/sub")).await.unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].name, "sub");
        assert!(chain[2].entries.is_empty());
        assert!(resolver.open_dir(&lib, root, &p("/top.txt")).await.is_err());
    }

    #[tokio::test]
    async fn open_deepest_reports_missing_tail() {
        let (resolver, lib, root) = tree().await;
        let (chain, missing) = resolver
            .open_deepest(&lib, root, &p("/docs/sub/x/y"))
            .await
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(missing, ["x", "y"]);

        let (_, none) = resolver.open_deepest(&lib, root, &p("/docs")).await.unwrap();
        assert!(none.is_empty());
        assert!(resolver.open_deepest(&lib, root, &p("/top.txt/x")).await.is_err());
    }

    #[tokio::test]
    async fn dir_entry_naming_a_file_is_corrupt() {
        let (resolver, lib, _) = tree().await;
        let objects = resolver.objects();
        let file = objects.put_file(&lib, "f", 1, Vec::new()).await.unwrap();
        let root = objects
            .put_dir(&lib, vec![DirEntry::dir("liar", file, 1)])
            .await
            .unwrap();

        let err = resolver.traverse(&lib, root, &p("/liar/x")).await.unwrap_err();
        assert!(matches!(&err, FsError::KindMismatch { path, id } if path == "/liar" && *id == file));
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let listed = resolver.open_dir(&lib, root, &p("/liar")).await.unwrap_err();
        assert_eq!(listed.kind(), ErrorKind::Corrupt);
        let deepest = resolver.open_deepest(&lib, root, &p("/liar/y")).await.unwrap_err();
        assert_eq!(deepest.kind(), ErrorKind::Corrupt);
    }
}
