use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("identifier must be lowercase hex: {0}")]
    NotLowercase(String),

    #[error("unknown storage class: {0}")]
    UnknownStorageClass(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Error taxonomy shared by every Strata crate.
///
/// Each crate keeps its own error enum but classifies every variant into one
/// of these kinds so the request layer can map failures to responses without
/// matching on crate-specific types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing library, commit, node, block, or path segment.
    NotFound,
    /// Name collision on a create/rename/move/copy target, or a head that
    /// moved underneath a writer.
    Conflict,
    /// Root deletion, wrong node kind, malformed path or name.
    InvalidArgument,
    /// Transient backend failure or an elapsed deadline. Safe to retry.
    StorageUnavailable,
    /// Stored data that does not parse or does not hash to its key.
    Corrupt,
}

impl ErrorKind {
    /// Returns `true` if the failed operation may succeed when retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::StorageUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidArgument => "invalid_argument",
            Self::StorageUnavailable => "storage_unavailable",
            Self::Corrupt => "corrupt",
        };
        f.write_str(s)
    }
}
