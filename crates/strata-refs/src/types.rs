//! Library and commit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_crypto::HasParent;
use strata_types::{CommitId, LibraryId, LibraryKey, NodeId, OrgId, StorageClass};

/// Client-side encryption parameters of a library.
///
/// The server stores these opaquely and hands them back to clients; it never
/// holds a usable key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    pub enc_version: u32,
    pub magic: String,
    pub random_key: String,
}

/// A tenant-scoped repository and its current head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub org: OrgId,
    pub owner: String,
    pub name: String,
    pub encryption: Option<Encryption>,
    pub storage_class: StorageClass,
    /// Always names a commit of this library whose root resolves.
    pub head: CommitId,
    /// Total bytes of all files reachable from the head.
    pub size: u64,
    pub file_count: u64,
    /// Days of history to keep; `None` keeps everything.
    pub version_days: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    pub fn key(&self) -> LibraryKey {
        LibraryKey::new(self.org, self.id)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}

/// Parameters for a new library.
#[derive(Clone, Debug, Default)]
pub struct NewLibrary {
    pub owner: String,
    pub name: String,
    /// Defaults to the configured storage class.
    pub storage_class: Option<StorageClass>,
    /// Defaults to the configured retention.
    pub version_days: Option<u32>,
    pub encryption: Option<Encryption>,
}

impl NewLibrary {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// An immutable snapshot of a library's tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub library: LibraryId,
    pub root: NodeId,
    pub parent: Option<CommitId>,
    pub creator: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl HasParent for Commit {
    fn id(&self) -> CommitId {
        self.id
    }

    fn parent(&self) -> Option<CommitId> {
        self.parent
    }
}

/// Signed change to a library's aggregate size and file count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDelta {
    pub size: i64,
    pub files: i64,
}

impl StatsDelta {
    pub fn new(size: i64, files: i64) -> Self {
        Self { size, files }
    }

    pub fn is_zero(&self) -> bool {
        self.size == 0 && self.files == 0
    }

    pub fn negate(self) -> Self {
        Self {
            size: self.size.saturating_neg(),
            files: self.files.saturating_neg(),
        }
    }

    /// Apply to a library row, flooring both totals at zero.
    pub fn apply(&self, library: &mut Library) {
        library.size = library.size.saturating_add_signed(self.size);
        library.file_count = library.file_count.saturating_add_signed(self.files);
    }
}

impl std::ops::Add for StatsDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            size: self.size.saturating_add(rhs.size),
            files: self.files.saturating_add(rhs.files),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Library {
        let now = Utc::now();
        Library {
            id: LibraryId::new(),
            org: OrgId::new(),
            owner: "alice".into(),
            name: "docs".into(),
            encryption: None,
            storage_class: StorageClass::Hot,
            head: CommitId::from_hash([1; 20]),
            size: 10,
            file_count: 1,
            version_days: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stats_floor_at_zero() {
        let mut lib = library();
        StatsDelta::new(-25, -3).apply(&mut lib);
        assert_eq!(lib.size, 0);
        assert_eq!(lib.file_count, 0);
    }

    #[test]
    fn stats_add_and_negate() {
        let total = StatsDelta::new(5, 1) + StatsDelta::new(7, 2);
        assert_eq!(total, StatsDelta::new(12, 3));
        assert_eq!(total.negate(), StatsDelta::new(-12, -3));
        assert!(StatsDelta::default().is_zero());
    }

    #[test]
    fn encryption_flag() {
        let mut lib = library();
        assert!(!lib.is_encrypted());
        lib.encryption = Some(Encryption {
            enc_version: 2,
            magic: "m".into(),
            random_key: "k".into(),
        });
        assert!(lib.is_encrypted());
    }

    #[test]
    fn library_row_round_trips() {
        let lib = library();
        let json = serde_json::to_string(&lib).unwrap();
        let back: Library = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lib);
    }
}
