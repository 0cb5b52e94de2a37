//! Error types for commit and head operations.

use strata_crypto::ChainError;
use strata_store::StoreError;
use strata_types::{CommitId, ErrorKind, LibraryId, LibraryKey};
use thiserror::Error;

/// Errors that can occur during commit and library head operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The library row does not exist.
    #[error("library not found: {0}")]
    LibraryNotFound(LibraryKey),

    /// The commit does not exist in this library.
    #[error("commit {id} not found in library {library}")]
    CommitNotFound { library: LibraryId, id: CommitId },

    /// A commit names a parent that cannot be loaded.
    #[error("commit {commit} names missing parent {parent}")]
    DanglingParent { commit: CommitId, parent: CommitId },

    /// The head moved since the caller read it.
    #[error("head moved: expected {expected}, found {actual}")]
    HeadMoved { expected: CommitId, actual: CommitId },

    /// The library name is invalid.
    #[error("invalid library name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("commit chain is broken: {0}")]
    BrokenChain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RefError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LibraryNotFound(_) | Self::CommitNotFound { .. } => ErrorKind::NotFound,
            Self::HeadMoved { .. } => ErrorKind::Conflict,
            Self::InvalidName { .. } => ErrorKind::InvalidArgument,
            Self::DanglingParent { .. } | Self::BrokenChain(_) => ErrorKind::Corrupt,
            Self::Store(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;
