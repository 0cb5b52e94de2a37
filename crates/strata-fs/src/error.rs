//! Error types for filesystem operations.

use strata_gc::GcError;
use strata_refs::RefError;
use strata_store::StoreError;
use strata_types::{ErrorKind, NodeId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The target directory already has an entry of that name.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("cannot {0} the root directory")]
    RootImmutable(&'static str),

    #[error("cannot move or copy {src} into its own subtree {dst}")]
    IntoOwnSubtree { src: String, dst: String },

    /// Every re-plan lost the head race.
    #[error("library head kept moving: gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// A parent entry the chain says exists is missing.
    #[error("broken ancestor chain: {0}")]
    BrokenChain(String),

    /// An entry's mode disagrees with the node it names.
    #[error("entry {path} is marked as a directory but {id} is not one")]
    KindMismatch { path: String, id: NodeId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    Gc(#[from] GcError),
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath { .. }
            | Self::InvalidName { .. }
            | Self::NotADirectory(_)
            | Self::IsADirectory(_)
            | Self::RootImmutable(_)
            | Self::IntoOwnSubtree { .. } => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::RetriesExhausted { .. } => ErrorKind::Conflict,
            Self::BrokenChain(_) | Self::KindMismatch { .. } => ErrorKind::Corrupt,
            Self::Store(e) => e.kind(),
            Self::Ref(e) => e.kind(),
            Self::Gc(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::CommitId;

    #[test]
    fn kinds() {
        assert_eq!(FsError::AlreadyExists("a".into()).kind(), ErrorKind::Conflict);
        assert_eq!(FsError::RootImmutable("delete").kind(), ErrorKind::InvalidArgument);
        let moved = FsError::from(RefError::HeadMoved {
            expected: CommitId::from_hash([1; 20]),
            actual: CommitId::from_hash([2; 20]),
        });
        assert_eq!(moved.kind(), ErrorKind::Conflict);
        assert!(FsError::from(StoreError::Unavailable("down".into())).is_retryable());
    }
}
