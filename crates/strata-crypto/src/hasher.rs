use sha1::Sha1;
use sha2::{Digest, Sha256};
use strata_types::{BlockId, CommitId, LibraryId, NodeId};

/// Format version prefixed to every canonical node encoding.
pub const NODE_FORMAT_VERSION: &str = "1";

/// Content hasher for every digest the sync protocol defines.
///
/// The desktop client recomputes node ids itself, so the digest algorithms
/// and the exact bytes hashed are fixed by the protocol: SHA-1 over
/// `"1\n" + canonical JSON` for nodes, SHA-256 over raw bytes for blocks.
/// Nothing here may add domain separation.
pub struct ContentHasher;

impl ContentHasher {
    /// Hash a node's canonical JSON body, prefixing the format version line.
    pub fn node_id(canonical_json: &[u8]) -> NodeId {
        let mut hasher = Sha1::new();
        hasher.update(NODE_FORMAT_VERSION.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_json);
        NodeId::from_hash(hasher.finalize().into())
    }

    /// Serialize a value as compact JSON and hash it as a node body.
    pub fn node_id_json<T: serde::Serialize>(value: &T) -> Result<NodeId, HasherError> {
        let body =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(Self::node_id(&body))
    }

    /// SHA-256 of raw block bytes.
    pub fn block_id(data: &[u8]) -> BlockId {
        BlockId::from_hash(Sha256::digest(data).into())
    }

    /// Verify that block bytes hash to the expected id.
    pub fn verify_block(data: &[u8], expected: &BlockId) -> bool {
        Self::block_id(data) == *expected
    }

    /// Derive a commit id from its provenance plus a uniqueness salt.
    ///
    /// Two commits of an identical tree by the same creator in the same
    /// nanosecond still differ through the salt.
    pub fn commit_id(library: &LibraryId, creator: &str, created_nanos: i64, salt: u64) -> CommitId {
        let mut hasher = Sha1::new();
        hasher.update(library.as_uuid().as_bytes());
        hasher.update(creator.as_bytes());
        hasher.update(b"\0");
        hasher.update(created_nanos.to_be_bytes());
        hasher.update(salt.to_be_bytes());
        CommitId::from_hash(hasher.finalize().into())
    }

    /// Commit id with a fresh random salt.
    pub fn salted_commit_id(library: &LibraryId, creator: &str, created_nanos: i64) -> CommitId {
        Self::commit_id(library, creator, created_nanos, rand::random())
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_matches_protocol() {
        let id = ContentHasher::node_id(b"[]");
        assert_eq!(id.to_hex(), "f7d1112824ad78dc61e83b6ce8d5c7c35a8f1cc3");
    }

    #[test]
    fn node_id_json_matches_raw() {
        let empty: Vec<u8> = Vec::new();
        assert_eq!(
            ContentHasher::node_id_json(&empty).unwrap(),
            ContentHasher::node_id(b"[]")
        );
    }

    #[test]
    fn block_id_is_plain_sha256() {
        let id = ContentHasher::block_id(b"hello world");
        assert_eq!(
            id.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn verify_block_detects_tampering() {
        let id = ContentHasher::block_id(b"original");
        assert!(ContentHasher::verify_block(b"original", &id));
        assert!(!ContentHasher::verify_block(b"tampered", &id));
    }

    #[test]
    fn commit_ids_depend_on_salt() {
        let lib = LibraryId::new();
        let a = ContentHasher::commit_id(&lib, "alice", 42, 1);
        let b = ContentHasher::commit_id(&lib, "alice", 42, 2);
        let again = ContentHasher::commit_id(&lib, "alice", 42, 1);
        assert_ne!(a, b);
        assert_eq!(a, again);
    }

    #[test]
    fn salted_commit_ids_differ() {
        let lib = LibraryId::new();
        let a = ContentHasher::salted_commit_id(&lib, "bob", 7);
        let b = ContentHasher::salted_commit_id(&lib, "bob", 7);
        assert_ne!(a, b);
    }
}
