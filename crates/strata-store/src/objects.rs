use strata_types::{BlockId, LibraryId, NodeId};

use crate::error::{StoreError, StoreResult};
use crate::node::{DirEntry, Directory, FileNode, Node, StoredNode};
use crate::tables::Tables;
use crate::traits::Family;

/// Content-addressed directory and file nodes of every library.
///
/// Nodes are partitioned by library and keyed by their hex id. Writes use
/// `put_if_absent`, so storing the same content twice is a no-op and a
/// stored node is never overwritten.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    tables: Tables,
}

impl ObjectStore {
    pub fn new(tables: Tables) -> Self {
        Self { tables }
    }

    /// Id of the directory with no entries: `sha1("1\n[]")`.
    pub fn empty_dir_id() -> NodeId {
        Directory::empty().id()
    }

    /// Canonicalize, hash and store a directory.
    #[tracing::instrument(skip(self, entries), fields(%library, entries = entries.len()))]
    pub async fn put_dir(&self, library: &LibraryId, entries: Vec<DirEntry>) -> StoreResult<NodeId> {
        let dir = Directory::new(entries)?;
        self.put_node(library, &dir.into()).await
    }

    /// Store a file node stamped with the current time.
    ///
    /// `name` only labels the log line; it is not part of the node.
    #[tracing::instrument(skip(self, block_ids), fields(%library, blocks = block_ids.len()))]
    pub async fn put_file(
        &self,
        library: &LibraryId,
        name: &str,
        size: u64,
        block_ids: Vec<BlockId>,
    ) -> StoreResult<NodeId> {
        let file = FileNode::new(size, chrono::Utc::now().timestamp(), block_ids)?;
        self.put_node(library, &file.into()).await
    }

    pub async fn put_node(&self, library: &LibraryId, node: &Node) -> StoreResult<NodeId> {
        let id = node.id();
        let created = self
            .tables
            .insert(Family::Nodes, &partition(library), &id.to_hex(), &node.to_stored())
            .await?;
        if created {
            tracing::debug!(%id, kind = node.kind(), "stored node");
        }
        Ok(id)
    }

    /// Load a node and verify it hashes back to `id`.
    pub async fn get(&self, library: &LibraryId, id: &NodeId) -> StoreResult<Node> {
        if *id == Self::empty_dir_id() {
            return Ok(Directory::empty().into());
        }
        let stored: StoredNode = self
            .tables
            .get(Family::Nodes, &partition(library), &id.to_hex())
            .await?
            .ok_or(StoreError::NodeNotFound(*id))?;
        Node::from_stored(stored, id)
    }

    pub async fn get_dir(&self, library: &LibraryId, id: &NodeId) -> StoreResult<Directory> {
        match self.get(library, id).await? {
            Node::Directory(d) => Ok(d),
            Node::File(_) => Err(StoreError::WrongKind {
                id: *id,
                expected: "directory",
            }),
        }
    }

    pub async fn get_file(&self, library: &LibraryId, id: &NodeId) -> StoreResult<FileNode> {
        match self.get(library, id).await? {
            Node::File(f) => Ok(f),
            Node::Directory(_) => Err(StoreError::WrongKind {
                id: *id,
                expected: "file",
            }),
        }
    }

    pub async fn exists(&self, library: &LibraryId, id: &NodeId) -> StoreResult<bool> {
        if *id == Self::empty_dir_id() {
            return Ok(true);
        }
        Ok(self
            .tables
            .get::<serde_json::Value>(Family::Nodes, &partition(library), &id.to_hex())
            .await?
            .is_some())
    }
}

fn partition(library: &LibraryId) -> String {
    library.to_string()
}
