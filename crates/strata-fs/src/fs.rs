//! Commit-producing filesystem operations on a library.

use std::sync::Arc;

use chrono::Utc;
use strata_gc::{TaskOp, TaskQueue};
use strata_refs::{Commit, LibraryHeads, RefError, StatsDelta};
use strata_store::{DirEntry, FileNode, ObjectStore, Tables};
use strata_types::{BlockId, CommitId, LibraryId, LibraryKey, NodeId, StoreConfig};
use tracing::{debug, error, info, warn};

use crate::diff::{diff_trees, TreeDiff};
use crate::entries::{add_entry, find_entry, remove_entry, update_entry};
use crate::error::{FsError, FsResult};
use crate::names::validate_entry_name;
use crate::path::FsPath;
use crate::rebuild::TreeMutator;
use crate::traverse::{Ancestor, PathResolver};

/// Outcome of a mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// The commit the head now points at. `None` when the operation found
    /// nothing to change.
    pub commit: Option<Commit>,
    /// The entry created, renamed, moved, copied or removed.
    pub entry: Option<DirEntry>,
}

enum Op<'a> {
    Mkdir(&'a FsPath),
    MkdirAll(&'a FsPath),
    CreateFile {
        path: &'a FsPath,
        size: u64,
        blocks: &'a [BlockId],
    },
    UpdateFile {
        path: &'a FsPath,
        size: u64,
        blocks: &'a [BlockId],
    },
    Rename {
        path: &'a FsPath,
        new_name: &'a str,
    },
    Delete(&'a FsPath),
    Move {
        src: &'a FsPath,
        dst_dir: &'a FsPath,
    },
    Copy {
        src: &'a FsPath,
        dst_dir: &'a FsPath,
    },
    Revert(&'a Commit),
}

impl Op<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Mkdir(_) => "mkdir",
            Self::MkdirAll(_) => "mkdir_all",
            Self::CreateFile { .. } => "create_file",
            Self::UpdateFile { .. } => "update_file",
            Self::Rename { .. } => "rename",
            Self::Delete(_) => "delete",
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::Revert(_) => "revert",
        }
    }
}

/// A new root and everything that has to follow it.
struct Plan {
    root: NodeId,
    description: String,
    delta: StatsDelta,
    tasks: Vec<TaskOp>,
    entry: Option<DirEntry>,
}

enum Planned {
    Commit(Plan),
    Unchanged(Option<DirEntry>),
}

/// Tree operations on libraries.
///
/// Every mutation follows the same sequence: read the head, resolve paths
/// against its root, build the new leaf directory, path-copy up to a new
/// root, record a commit, then compare-and-set the head from the commit it
/// planned against. A writer that loses the head race re-plans against the
/// new head, up to `max_head_retries` times. Reference-count work is queued
/// only after the head has moved.
#[derive(Clone, Debug)]
pub struct FileSystem {
    objects: ObjectStore,
    resolver: PathResolver,
    mutator: TreeMutator,
    heads: LibraryHeads,
    queue: TaskQueue,
    config: Arc<StoreConfig>,
}

impl FileSystem {
    pub fn new(tables: Tables, config: Arc<StoreConfig>) -> Self {
        let objects = ObjectStore::new(tables.clone());
        Self {
            resolver: PathResolver::new(objects.clone()),
            mutator: TreeMutator::new(objects.clone()),
            heads: LibraryHeads::new(tables.clone(), config.clone()),
            queue: TaskQueue::new(tables, &config.refcount),
            objects,
            config,
        }
    }

    pub fn heads(&self) -> &LibraryHeads {
        &self.heads
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    // -- mutations ----------------------------------------------------------

    pub async fn mkdir(&self, key: &LibraryKey, path: &str, actor: &str) -> FsResult<Change> {
        let path = FsPath::parse(path)?;
        self.apply(key, actor, Op::Mkdir(&path)).await
    }

    /// Create `path` and any missing parents. Existing directories are left
    /// alone; nothing is committed if the whole path exists.
    pub async fn mkdir_all(&self, key: &LibraryKey, path: &str, actor: &str) -> FsResult<Change> {
        let path = FsPath::parse(path)?;
        self.apply(key, actor, Op::MkdirAll(&path)).await
    }

    /// Link blocks into the tree as a new file.
    ///
    /// The commit owns the file's references: a retain of the new file node
    /// is queued once the head moves. Blocks may come from a fresh
    /// `BlockStore::stage` or from a dedup check that found them already
    /// stored.
    pub async fn create_file(
        &self,
        key: &LibraryKey,
        path: &str,
        size: u64,
        blocks: &[BlockId],
        actor: &str,
    ) -> FsResult<Change> {
        let path = FsPath::parse(path)?;
        self.apply(key, actor, Op::CreateFile { path: &path, size, blocks })
            .await
    }

    /// Replace an existing file's content. The new content is retained and
    /// the old content released.
    pub async fn update_file(
        &self,
        key: &LibraryKey,
        path: &str,
        size: u64,
        blocks: &[BlockId],
        actor: &str,
    ) -> FsResult<Change> {
        let path = FsPath::parse(path)?;
        self.apply(key, actor, Op::UpdateFile { path: &path, size, blocks })
            .await
    }

    pub async fn rename(
        &self,
        key: &LibraryKey,
        path: &str,
        new_name: &str,
        actor: &str,
    ) -> FsResult<Change> {
        let path = FsPath::parse(path)?;
        validate_entry_name(new_name)?;
        self.apply(key, actor, Op::Rename { path: &path, new_name })
            .await
    }

    pub async fn delete(&self, key: &LibraryKey, path: &str, actor: &str) -> FsResult<Change> {
        let path = FsPath::parse(path)?;
        self.apply(key, actor, Op::Delete(&path)).await
    }

    /// Move the entry at `src` into the directory `dst_dir`, keeping its name.
    pub async fn move_entry(
        &self,
        key: &LibraryKey,
        src: &str,
        dst_dir: &str,
        actor: &str,
    ) -> FsResult<Change> {
        let src = FsPath::parse(src)?;
        let dst_dir = FsPath::parse(dst_dir)?;
        self.apply(key, actor, Op::Move { src: &src, dst_dir: &dst_dir })
            .await
    }

    /// Copy the entry at `src` into `dst_dir`. The copy shares every node
    /// with the original.
    pub async fn copy_entry(
        &self,
        key: &LibraryKey,
        src: &str,
        dst_dir: &str,
        actor: &str,
    ) -> FsResult<Change> {
        let src = FsPath::parse(src)?;
        let dst_dir = FsPath::parse(dst_dir)?;
        self.apply(key, actor, Op::Copy { src: &src, dst_dir: &dst_dir })
            .await
    }

    /// Commit an older commit's root as the new head.
    pub async fn revert(&self, key: &LibraryKey, to: &CommitId, actor: &str) -> FsResult<Change> {
        let target = self.heads.commits().get_commit(&key.library, to).await?;
        self.apply(key, actor, Op::Revert(&target)).await
    }

    // -- reads ----------------------------------------------------------------

    pub async fn head(&self, key: &LibraryKey) -> FsResult<Commit> {
        let library = self.heads.get_library(&key.org, &key.library).await?;
        Ok(self
            .heads
            .commits()
            .get_commit(&key.library, &library.head)
            .await?)
    }

    pub async fn list_dir(&self, key: &LibraryKey, path: &str) -> FsResult<Vec<DirEntry>> {
        let head = self.head(key).await?;
        self.list_in(&key.library, head.root, path).await
    }

    pub async fn list_dir_at(
        &self,
        key: &LibraryKey,
        commit: &CommitId,
        path: &str,
    ) -> FsResult<Vec<DirEntry>> {
        let commit = self.heads.commits().get_commit(&key.library, commit).await?;
        self.list_in(&key.library, commit.root, path).await
    }

    /// The entry at `path` in the head tree. The root is reported as a
    /// directory entry with an empty name.
    pub async fn stat(&self, key: &LibraryKey, path: &str) -> FsResult<DirEntry> {
        let path = FsPath::parse(path)?;
        let head = self.head(key).await?;
        let result = self.resolver.traverse(&key.library, head.root, &path).await?;
        Ok(result
            .target
            .unwrap_or_else(|| DirEntry::dir("", head.root, head.created_at.timestamp())))
    }

    /// The file node at `path`, carrying its ordered block list.
    pub async fn read_file(&self, key: &LibraryKey, path: &str) -> FsResult<FileNode> {
        let path = FsPath::parse(path)?;
        let head = self.head(key).await?;
        let result = self.resolver.traverse(&key.library, head.root, &path).await?;
        if result.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        Ok(self.objects.get_file(&key.library, &result.target_id).await?)
    }

    /// Commits from the head backwards, newest first.
    pub async fn history(&self, key: &LibraryKey, limit: usize) -> FsResult<Vec<Commit>> {
        let library = self.heads.get_library(&key.org, &key.library).await?;
        Ok(self
            .heads
            .commits()
            .history(&key.library, &library.head, limit)
            .await?)
    }

    pub async fn diff(&self, key: &LibraryKey, old: &CommitId, new: &CommitId) -> FsResult<TreeDiff> {
        let commits = self.heads.commits();
        let old = commits.get_commit(&key.library, old).await?;
        let new = commits.get_commit(&key.library, new).await?;
        diff_trees(&self.objects, &key.library, old.root, new.root).await
    }

    async fn list_in(&self, library: &LibraryId, root: NodeId, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = FsPath::parse(path)?;
        let mut chain = self.resolver.open_dir(library, root, &path).await?;
        Ok(chain.pop().map(|dir| dir.entries).unwrap_or_default())
    }

    // -- plan / commit loop ---------------------------------------------------

    #[tracing::instrument(skip(self, op), fields(%key, op = op.name()))]
    async fn apply(&self, key: &LibraryKey, actor: &str, op: Op<'_>) -> FsResult<Change> {
        let attempts = self.config.max_head_retries.saturating_add(1);
        let commits = self.heads.commits();

        for attempt in 1..=attempts {
            let library = self.heads.get_library(&key.org, &key.library).await?;
            let head = commits.get_commit(&key.library, &library.head).await?;

            let plan = match self.plan(&key.library, head.root, actor, &op).await? {
                Planned::Commit(plan) => plan,
                Planned::Unchanged(entry) => {
                    debug!("nothing to change");
                    return Ok(Change { commit: None, entry });
                }
            };

            let commit = commits
                .create_commit(&key.library, actor, plan.root, Some(head.id), &plan.description)
                .await?;
            match self
                .heads
                .update_head(&key.org, &key.library, &head.id, &commit.id, plan.delta)
                .await
            {
                Ok(_) => {
                    self.enqueue(key, plan.tasks).await;
                    info!(commit = %commit.id, root = %plan.root, "{}", plan.description);
                    return Ok(Change {
                        commit: Some(commit),
                        entry: plan.entry,
                    });
                }
                Err(RefError::HeadMoved { actual, .. }) => {
                    debug!(attempt, %actual, "head moved, re-planning");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts, "gave up after repeated head races");
        Err(FsError::RetriesExhausted { attempts })
    }

    /// Queue reference-count work for a committed change.
    ///
    /// The head has already moved, so a failure here cannot be rolled back.
    /// It is logged; the affected blocks keep their old counts.
    async fn enqueue(&self, key: &LibraryKey, tasks: Vec<TaskOp>) {
        for op in tasks {
            if let Err(e) = self.queue.enqueue(&key.org, &key.library, op).await {
                error!(%key, ?op, error = %e, "failed to enqueue refcount task");
            }
        }
    }

    async fn plan(
        &self,
        lib: &LibraryId,
        root: NodeId,
        actor: &str,
        op: &Op<'_>,
    ) -> FsResult<Planned> {
        let now = Utc::now().timestamp();
        match *op {
            Op::Mkdir(path) => {
                let (parent, name) = split(path, "create")?;
                let chain = self.resolver.open_dir(lib, root, &parent).await?;
                let mut entries = last_entries(&chain)?;
                let empty = self.objects.put_dir(lib, Vec::new()).await?;
                let entry = DirEntry::dir(name, empty, now).with_modifier(actor);
                if find_entry(&entries, name).is_some() {
                    return Err(FsError::AlreadyExists(path.to_string()));
                }
                add_entry(&mut entries, entry.clone())?;
                let root = self.mutator.rebuild_to_root(lib, &chain, entries, now).await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Added directory \"{name}\""),
                    delta: StatsDelta::default(),
                    tasks: Vec::new(),
                    entry: Some(entry),
                }))
            }

            Op::MkdirAll(path) => {
                if path.is_root() {
                    return Ok(Planned::Unchanged(None));
                }
                let (chain, missing) = self.resolver.open_deepest(lib, root, path).await?;
                let Some((leaf_name, above)) = missing.split_last() else {
                    let existing = chain
                        .len()
                        .checked_sub(2)
                        .zip(path.name())
                        .and_then(|(i, name)| find_entry(&chain[i].entries, name).cloned());
                    return Ok(Planned::Unchanged(existing));
                };

                let empty = self.objects.put_dir(lib, Vec::new()).await?;
                let leaf = DirEntry::dir(leaf_name.as_str(), empty, now).with_modifier(actor);
                let mut child = leaf.clone();
                for name in above.iter().rev() {
                    let id = self.objects.put_dir(lib, vec![child]).await?;
                    child = DirEntry::dir(name.as_str(), id, now).with_modifier(actor);
                }
                let mut entries = last_entries(&chain)?;
                add_entry(&mut entries, child)?;
                let root = self.mutator.rebuild_to_root(lib, &chain, entries, now).await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Added directory \"{leaf_name}\""),
                    delta: StatsDelta::default(),
                    tasks: Vec::new(),
                    entry: Some(leaf),
                }))
            }

            Op::CreateFile { path, size, blocks } => {
                let (parent, name) = split(path, "create")?;
                let chain = self.resolver.open_dir(lib, root, &parent).await?;
                let mut entries = last_entries(&chain)?;
                if find_entry(&entries, name).is_some() {
                    return Err(FsError::AlreadyExists(path.to_string()));
                }
                let id = self.objects.put_file(lib, name, size, blocks.to_vec()).await?;
                let entry = DirEntry::file(name, id, size, now).with_modifier(actor);
                add_entry(&mut entries, entry.clone())?;
                let root = self.mutator.rebuild_to_root(lib, &chain, entries, now).await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Added \"{name}\""),
                    delta: StatsDelta::new(signed(size), 1),
                    tasks: vec![TaskOp::Retain {
                        root: id,
                        stats: false,
                    }],
                    entry: Some(entry),
                }))
            }

            Op::UpdateFile { path, size, blocks } => {
                let (parent, name) = split(path, "write")?;
                let chain = self.resolver.open_dir(lib, root, &parent).await?;
                let mut entries = last_entries(&chain)?;
                let old = remove_entry(&mut entries, name)
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                if old.is_dir() {
                    return Err(FsError::IsADirectory(path.to_string()));
                }
                let id = self.objects.put_file(lib, name, size, blocks.to_vec()).await?;
                let entry = DirEntry::file(name, id, size, now).with_modifier(actor);
                add_entry(&mut entries, entry.clone())?;
                let root = self.mutator.rebuild_to_root(lib, &chain, entries, now).await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Modified \"{name}\""),
                    delta: StatsDelta::new(signed(size) - signed(old.size), 0),
                    tasks: vec![
                        TaskOp::Retain {
                            root: id,
                            stats: false,
                        },
                        TaskOp::Release {
                            root: old.id,
                            stats: false,
                        },
                    ],
                    entry: Some(entry),
                }))
            }

            Op::Rename { path, new_name } => {
                let (parent, name) = split(path, "rename")?;
                let chain = self.resolver.open_dir(lib, root, &parent).await?;
                let mut entries = last_entries(&chain)?;
                let Some(existing) = find_entry(&entries, name).cloned() else {
                    return Err(FsError::NotFound(path.to_string()));
                };
                if name == new_name {
                    return Ok(Planned::Unchanged(Some(existing)));
                }
                if find_entry(&entries, new_name).is_some() {
                    return Err(FsError::AlreadyExists(parent.join(new_name)?.to_string()));
                }
                let entry = update_entry(&mut entries, name, new_name)?;
                let root = self.mutator.rebuild_to_root(lib, &chain, entries, now).await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Renamed \"{name}\" to \"{new_name}\""),
                    delta: StatsDelta::default(),
                    tasks: Vec::new(),
                    entry: Some(entry),
                }))
            }

            Op::Delete(path) => {
                let (parent, name) = split(path, "delete")?;
                let chain = self.resolver.open_dir(lib, root, &parent).await?;
                let mut entries = last_entries(&chain)?;
                let removed = remove_entry(&mut entries, name)
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                let root = self.mutator.rebuild_to_root(lib, &chain, entries, now).await?;
                let description = if removed.is_dir() {
                    format!("Removed directory \"{name}\"")
                } else {
                    format!("Deleted \"{name}\"")
                };
                Ok(Planned::Commit(Plan {
                    root,
                    description,
                    delta: StatsDelta::default(),
                    tasks: vec![TaskOp::Release {
                        root: removed.id,
                        stats: true,
                    }],
                    entry: Some(removed),
                }))
            }

            Op::Move { src, dst_dir } => {
                let (src_parent, name) = split(src, "move")?;
                let src_chain = self.resolver.open_dir(lib, root, &src_parent).await?;
                let mut src_entries = last_entries(&src_chain)?;
                let entry = find_entry(&src_entries, name)
                    .cloned()
                    .ok_or_else(|| FsError::NotFound(src.to_string()))?;
                check_not_into_self(&entry, src, dst_dir)?;
                if src_parent == *dst_dir {
                    return Ok(Planned::Unchanged(Some(entry)));
                }

                let dst_chain = self.resolver.open_dir(lib, root, dst_dir).await?;
                let mut dst_entries = last_entries(&dst_chain)?;
                if find_entry(&dst_entries, name).is_some() {
                    return Err(FsError::AlreadyExists(dst_dir.join(name)?.to_string()));
                }
                remove_entry(&mut src_entries, name);
                add_entry(&mut dst_entries, entry.clone())?;
                let root = self
                    .mutator
                    .rebuild_two(lib, &src_chain, src_entries, &dst_chain, dst_entries, now)
                    .await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Moved \"{name}\""),
                    delta: StatsDelta::default(),
                    tasks: Vec::new(),
                    entry: Some(entry),
                }))
            }

            Op::Copy { src, dst_dir } => {
                let (_, name) = split(src, "copy")?;
                let source = self.resolver.traverse(lib, root, src).await?;
                let Some(original) = source.target else {
                    return Err(FsError::RootImmutable("copy"));
                };
                check_not_into_self(&original, src, dst_dir)?;

                let dst_chain = self.resolver.open_dir(lib, root, dst_dir).await?;
                let mut dst_entries = last_entries(&dst_chain)?;
                if find_entry(&dst_entries, name).is_some() {
                    return Err(FsError::AlreadyExists(dst_dir.join(name)?.to_string()));
                }
                let mut copy = original.clone();
                copy.mtime = now;
                copy.modifier = Some(actor.to_string());
                add_entry(&mut dst_entries, copy.clone())?;
                let root = self
                    .mutator
                    .rebuild_to_root(lib, &dst_chain, dst_entries, now)
                    .await?;
                Ok(Planned::Commit(Plan {
                    root,
                    description: format!("Copied \"{name}\""),
                    delta: StatsDelta::default(),
                    tasks: vec![TaskOp::Retain {
                        root: original.id,
                        stats: true,
                    }],
                    entry: Some(copy),
                }))
            }

            Op::Revert(target) => {
                if target.root == root {
                    return Ok(Planned::Unchanged(None));
                }
                Ok(Planned::Commit(Plan {
                    root: target.root,
                    description: format!(
                        "Reverted library to status at {}",
                        target.created_at.format("%Y-%m-%d %H:%M:%S")
                    ),
                    delta: StatsDelta::default(),
                    tasks: vec![
                        TaskOp::Retain {
                            root: target.root,
                            stats: true,
                        },
                        TaskOp::Release { root, stats: true },
                    ],
                    entry: None,
                }))
            }
        }
    }
}

/// Split a non-root path into its parent and final name.
fn split<'p>(path: &'p FsPath, op: &'static str) -> FsResult<(FsPath, &'p str)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(FsError::RootImmutable(op)),
    }
}

fn last_entries(chain: &[Ancestor]) -> FsResult<Vec<DirEntry>> {
    chain
        .last()
        .map(|dir| dir.entries.clone())
        .ok_or_else(|| FsError::BrokenChain("empty ancestor chain".into()))
}

fn check_not_into_self(entry: &DirEntry, src: &FsPath, dst_dir: &FsPath) -> FsResult<()> {
    if entry.is_dir() && dst_dir.starts_with(src) {
        return Err(FsError::IntoOwnSubtree {
            src: src.to_string(),
            dst: dst_dir.to_string(),
        });
    }
    Ok(())
}

fn signed(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
