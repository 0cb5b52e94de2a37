//! Copy-on-write rebuilds from an edited directory up to a new root.

use strata_store::{DirEntry, ObjectStore};
use strata_types::{LibraryId, NodeId};

use crate::entries::relink_entry;
use crate::error::{FsError, FsResult};
use crate::traverse::Ancestor;

/// Writes the new directory nodes a tree edit needs.
///
/// Only the directories on the edited path are rewritten. Every subtree
/// beside it keeps its id and is shared with the previous root.
#[derive(Clone, Debug)]
pub struct TreeMutator {
    objects: ObjectStore,
}

impl TreeMutator {
    pub fn new(objects: ObjectStore) -> Self {
        Self { objects }
    }

    /// Store `entries` as the new content of the last directory in `chain`
    /// and path-copy every ancestor. Returns the new root id.
    pub async fn rebuild_to_root(
        &self,
        library: &LibraryId,
        chain: &[Ancestor],
        entries: Vec<DirEntry>,
        mtime: i64,
    ) -> FsResult<NodeId> {
        self.rebuild_up(library, chain, entries, 0, mtime).await
    }

    /// Apply edits to two directories of the same tree and produce one root.
    ///
    /// Both chains start at the root. Below their lowest common ancestor
    /// each side is rebuilt on its own; the ancestor is rewritten once with
    /// both new child ids, then the shared prefix is rebuilt to the root.
    /// Either directory may itself be the common ancestor.
    pub async fn rebuild_two(
        &self,
        library: &LibraryId,
        src: &[Ancestor],
        src_entries: Vec<DirEntry>,
        dst: &[Ancestor],
        dst_entries: Vec<DirEntry>,
        mtime: i64,
    ) -> FsResult<NodeId> {
        match (src.first(), dst.first()) {
            (Some(a), Some(b)) if a.id == b.id => {}
            _ => return Err(FsError::BrokenChain("chains do not share a root".into())),
        }

        let mut lca = 0;
        while lca + 1 < src.len() && lca + 1 < dst.len() && src[lca + 1].name == dst[lca + 1].name {
            lca += 1;
        }
        let src_is_lca = src.len() == lca + 1;
        let dst_is_lca = dst.len() == lca + 1;

        let (mut top, src_below, dst_below) = match (src_is_lca, dst_is_lca) {
            (true, true) => {
                return Err(FsError::BrokenChain(
                    "both edits target the same directory".into(),
                ))
            }
            (true, false) => (src_entries, None, Some(dst_entries)),
            (false, true) => (dst_entries, Some(src_entries), None),
            (false, false) => (src[lca].entries.clone(), Some(src_entries), Some(dst_entries)),
        };

        for (chain, entries) in [(src, src_below), (dst, dst_below)] {
            let Some(entries) = entries else { continue };
            let id = self.rebuild_up(library, chain, entries, lca + 1, mtime).await?;
            relink_entry(&mut top, &chain[lca + 1].name, id, mtime)?;
        }

        self.rebuild_up(library, &src[..=lca], top, 0, mtime).await
    }

    /// Rebuild `chain` from its last directory up to `chain[stop]` and
    /// return the new id of `chain[stop]`.
    async fn rebuild_up(
        &self,
        library: &LibraryId,
        chain: &[Ancestor],
        entries: Vec<DirEntry>,
        stop: usize,
        mtime: i64,
    ) -> FsResult<NodeId> {
        let Some(last) = chain.len().checked_sub(1) else {
            return Err(FsError::BrokenChain("empty ancestor chain".into()));
        };
        let mut id = self.objects.put_dir(library, entries).await?;
        for i in (stop..last).rev() {
            let mut parent = chain[i].entries.clone();
            relink_entry(&mut parent, &chain[i + 1].name, id, mtime)?;
            id = self.objects.put_dir(library, parent).await?;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_store::{InMemoryColumnStore, Tables};
    use strata_types::StoreConfig;

    use crate::entries::{add_entry, remove_entry};
    use crate::path::FsPath;
    use crate::traverse::PathResolver;

    struct Fixture {
        objects: ObjectStore,
        resolver: PathResolver,
        mutator: TreeMutator,
        lib: LibraryId,
    }

    fn fixture() -> Fixture {
        let tables = Tables::new(Arc::new(InMemoryColumnStore::new()), &StoreConfig::default());
        let objects = ObjectStore::new(tables);
        Fixture {
            resolver: PathResolver::new(objects.clone()),
            mutator: TreeMutator::new(objects.clone()),
            objects,
            lib: LibraryId::new(),
        }
    }

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    impl Fixture {
        async fn dir(&self, entries: Vec<DirEntry>) -> NodeId {
            self.objects.put_dir(&self.lib, entries).await.unwrap()
        }

        async fn file(&self, size: u64) -> NodeId {
            self.objects.put_file(&self.lib, "f", size, Vec::new()).await.unwrap()
        }

        async fn id_at(&self, root: NodeId, path: &str) -> NodeId {
            self.resolver.traverse(&self.lib, root, &p(path)).await.unwrap().target_id
        }

        /// ```text
        /// /a/x/deep/f.txt
        /// /a/y/deep/
        /// /a/z.txt
        /// /b/g.txt
        /// ```
        async fn sample(&self) -> NodeId {
            let f = self.file(1).await;
            let g = self.file(2).await;
            let x_deep = self.dir(vec![DirEntry::file("f.txt", f, 1, 1)]).await;
            let y_deep = self.dir(Vec::new()).await;
            let x = self.dir(vec![DirEntry::dir("deep", x_deep, 1)]).await;
            let y = self.dir(vec![DirEntry::dir("deep", y_deep, 1)]).await;
            let a = self
                .dir(vec![
                    DirEntry::dir("x", x, 1),
                    DirEntry::dir("y", y, 1),
                    DirEntry::file("z.txt", g, 2, 1),
                ])
                .await;
            let b = self.dir(vec![DirEntry::file("g.txt", g, 2, 1)]).await;
            self.dir(vec![DirEntry::dir("a", a, 1), DirEntry::dir("b", b, 1)]).await
        }
    }

    #[tokio::test]
    async fn rebuild_shares_untouched_subtrees() {
        let fx = fixture();
        let root = fx.sample().await;
        let chain = fx.resolver.open_dir(&fx.lib, root, &p("/a/y/deep")).await.unwrap();
        let mut entries = chain.last().unwrap().entries.clone();
        let new_file = fx.file(5).await;
        add_entry(&mut entries, DirEntry::file("new.txt", new_file, 5, 9)).unwrap();

        let new_root = fx.mutator.rebuild_to_root(&fx.lib, &chain, entries, 9).await.unwrap();
        assert_ne!(new_root, root);
        for unchanged in ["/b", "/a/x", "/a/z.txt"] {
            assert_eq!(fx.id_at(root, unchanged).await, fx.id_at(new_root, unchanged).await);
        }
        for changed in ["/a", "/a/y", "/a/y/deep"] {
            assert_ne!(fx.id_at(root, changed).await, fx.id_at(new_root, changed).await);
        }

        let y = fx.resolver.traverse(&fx.lib, new_root, &p("/a/y")).await.unwrap();
        assert_eq!(y.target.unwrap().mtime, 9);
        // The old root still resolves to the old content.
        assert!(fx.resolver.traverse(&fx.lib, root, &p("/a/y/deep/new.txt")).await.is_err());
    }

    #[tokio::test]
    async fn editing_the_root_rebuilds_one_node() {
        let fx = fixture();
        let root = fx.sample().await;
        let chain = fx.resolver.open_dir(&fx.lib, root, &FsPath::root()).await.unwrap();
        let mut entries = chain[0].entries.clone();
        remove_entry(&mut entries, "b").unwrap();
        let new_root = fx.mutator.rebuild_to_root(&fx.lib, &chain, entries, 2).await.unwrap();
        assert_eq!(fx.id_at(root, "/a").await, fx.id_at(new_root, "/a").await);
        assert!(fx.resolver.traverse(&fx.lib, new_root, &p("/b")).await.is_err());
    }

    #[tokio::test]
    async fn move_between_deep_siblings() {
        let fx = fixture();
        let root = fx.sample().await;
        let src = fx.resolver.open_dir(&fx.lib, root, &p("/a/x/deep")).await.unwrap();
        let dst = fx.resolver.open_dir(&fx.lib, root, &p("/a/y/deep")).await.unwrap();

        let mut src_entries = src.last().unwrap().entries.clone();
        let moved = remove_entry(&mut src_entries, "f.txt").unwrap();
        let mut dst_entries = dst.last().unwrap().entries.clone();
        add_entry(&mut dst_entries, moved.clone()).unwrap();

        let new_root = fx
            .mutator
            .rebuild_two(&fx.lib, &src, src_entries, &dst, dst_entries, 7)
            .await
            .unwrap();

        assert_eq!(fx.id_at(new_root, "/a/y/deep/f.txt").await, moved.id);
        assert!(fx.resolver.traverse(&fx.lib, new_root, &p("/a/x/deep/f.txt")).await.is_err());
        assert_eq!(fx.id_at(root, "/b").await, fx.id_at(new_root, "/b").await);
        assert_eq!(fx.id_at(root, "/a/z.txt").await, fx.id_at(new_root, "/a/z.txt").await);
    }

    #[tokio::test]
    async fn move_up_into_the_common_ancestor() {
        let fx = fixture();
        let root = fx.sample().await;
        let src = fx.resolver.open_dir(&fx.lib, root, &p("/a/x/deep")).await.unwrap();
        let dst = fx.resolver.open_dir(&fx.lib, root, &p("/a")).await.unwrap();

        let mut src_entries = src.last().unwrap().entries.clone();
        let moved = remove_entry(&mut src_entries, "f.txt").unwrap();
        let mut dst_entries = dst.last().unwrap().entries.clone();
        add_entry(&mut dst_entries, moved.clone()).unwrap();

        let new_root = fx
            .mutator
            .rebuild_two(&fx.lib, &src, src_entries, &dst, dst_entries, 7)
            .await
            .unwrap();
        assert_eq!(fx.id_at(new_root, "/a/f.txt").await, moved.id);
        let deep = fx.resolver.open_dir(&fx.lib, new_root, &p("/a/x/deep")).await.unwrap();
        assert!(deep.last().unwrap().entries.is_empty());
        assert_eq!(fx.id_at(root, "/a/y").await, fx.id_at(new_root, "/a/y").await);
    }

    #[tokio::test]
    async fn same_directory_is_rejected() {
        let fx = fixture();
        let root = fx.sample().await;
        let chain = fx.resolver.open_dir(&fx.lib, root, &p("/b")).await.unwrap();
        let entries = chain.last().unwrap().entries.clone();
        let err = fx
            .mutator
            .rebuild_two(&fx.lib, &chain, entries.clone(), &chain, entries, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::BrokenChain(_)));
    }
}
