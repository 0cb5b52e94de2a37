use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strata_crypto::ContentHasher;
use strata_types::{BlockId, NodeId};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// EntryMode
// ---------------------------------------------------------------------------

/// Mode of a directory entry.
///
/// Serialized as the bare integer the sync client expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// Regular file (0o100644, 33188).
    File,
    /// Directory (0o040000, 16384).
    Directory,
}

impl EntryMode {
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::File => 0o100644,
            Self::Directory => 0o040000,
        }
    }

    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        match bits {
            0o100644 => Some(Self::File),
            0o040000 => Some(Self::Directory),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

impl Serialize for EntryMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.mode_bits())
    }
}

impl<'de> Deserialize<'de> for EntryMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Self::from_mode_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported mode {bits}")))
    }
}

// ---------------------------------------------------------------------------
// DirEntry
// ---------------------------------------------------------------------------

/// One entry of a directory node.
///
/// Field declaration order is the canonical JSON key order and therefore
/// part of the node hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub id: NodeId,
    pub mode: EntryMode,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    /// File size in bytes; always 0 for directories.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
}

impl DirEntry {
    pub fn file(name: impl Into<String>, id: NodeId, size: u64, mtime: i64) -> Self {
        Self {
            name: name.into(),
            id,
            mode: EntryMode::File,
            mtime,
            size,
            modifier: None,
        }
    }

    pub fn dir(name: impl Into<String>, id: NodeId, mtime: i64) -> Self {
        Self {
            name: name.into(),
            id,
            mode: EntryMode::Directory,
            mtime,
            size: 0,
            modifier: None,
        }
    }

    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifier = Some(modifier.into());
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode == EntryMode::Directory
    }
}

impl PartialOrd for DirEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DirEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Immutable directory node: entries sorted by name, plus its content id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
    id: NodeId,
}

impl Directory {
    /// Canonicalize and hash. Duplicate names are rejected.
    pub fn new(mut entries: Vec<DirEntry>) -> StoreResult<Self> {
        entries.sort();
        if let Some(pair) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(StoreError::InvalidArgument(format!(
                "duplicate entry name {:?}",
                pair[0].name
            )));
        }
        let id = ContentHasher::node_id_json(&entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self { entries, id })
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            id: ContentHasher::node_id(b"[]"),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }

    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The exact bytes hashed into the id, without the version line.
    pub fn canonical_json(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(&self.entries).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FileNode
// ---------------------------------------------------------------------------

/// Immutable file node. The id covers size and block list only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileNode {
    size: u64,
    mtime: i64,
    block_ids: Vec<BlockId>,
    id: NodeId,
}

#[derive(Serialize)]
struct FileHashInput<'a> {
    block_ids: &'a [BlockId],
    size: u64,
}

impl FileNode {
    pub fn new(size: u64, mtime: i64, block_ids: Vec<BlockId>) -> StoreResult<Self> {
        let id = ContentHasher::node_id_json(&FileHashInput {
            block_ids: &block_ids,
            size,
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            size,
            mtime,
            block_ids,
            id,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn block_ids(&self) -> &[BlockId] {
        &self.block_ids
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A directory or file node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Directory(Directory),
    File(FileNode),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Self::Directory(d) => d.id(),
            Self::File(f) => f.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::File(_) => "file",
        }
    }

    pub fn as_dir(&self) -> Option<&Directory> {
        match self {
            Self::Directory(d) => Some(d),
            Self::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Self::File(f) => Some(f),
            Self::Directory(_) => None,
        }
    }

    /// Row form persisted in the node family.
    pub(crate) fn to_stored(&self) -> StoredNode {
        match self {
            Self::Directory(d) => StoredNode::Directory {
                entries: d.entries.clone(),
            },
            Self::File(f) => StoredNode::File {
                size: f.size,
                mtime: f.mtime,
                block_ids: f.block_ids.clone(),
            },
        }
    }

    /// Rebuild from a row and check it hashes back to `expected`.
    ///
    /// A row that does not form a valid node is corrupt, whatever the
    /// construction error was.
    pub(crate) fn from_stored(stored: StoredNode, expected: &NodeId) -> StoreResult<Self> {
        let built = match stored {
            StoredNode::Directory { entries } => Directory::new(entries).map(Self::Directory),
            StoredNode::File {
                size,
                mtime,
                block_ids,
            } => FileNode::new(size, mtime, block_ids).map(Self::File),
        };
        let node = built.map_err(|e| StoreError::Corrupt {
            key: expected.to_hex(),
            reason: e.to_string(),
        })?;
        if node.id() != *expected {
            return Err(StoreError::Corrupt {
                key: expected.to_hex(),
                reason: format!("content hashes to {}", node.id()),
            });
        }
        Ok(node)
    }
}

impl From<Directory> for Node {
    fn from(d: Directory) -> Self {
        Self::Directory(d)
    }
}

impl From<FileNode> for Node {
    fn from(f: FileNode) -> Self {
        Self::File(f)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StoredNode {
    Directory {
        entries: Vec<DirEntry>,
    },
    File {
        size: u64,
        mtime: i64,
        block_ids: Vec<BlockId>,
    },
}
