use strata_store::StoreError;
use strata_types::{BlockId, ErrorKind, StorageClass};

/// Errors reported by blob backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend does not support restores")]
    RestoreNotSupported,

    #[error("unknown restore handle: {0}")]
    UnknownRestore(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors from block storage operations.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// The block lives in an archival tier and must be restored first.
    #[error("block {id} is in {class} storage and must be restored first")]
    RestoreRequired { id: BlockId, class: StorageClass },

    #[error("claimed block id {claimed} does not match content hash {actual}")]
    HashMismatch { claimed: BlockId, actual: BlockId },

    #[error("block {id} is corrupt: {reason}")]
    Corrupt { id: BlockId, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no backend registered for {0} storage")]
    NoBackend(StorageClass),

    #[error("{backend} backend: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("blob call {op} timed out after {after_ms} ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("no restore job for block {0}")]
    JobNotFound(BlockId),

    #[error("restore of block {id} failed: {reason}")]
    RestoreFailed { id: BlockId, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::JobNotFound(_) => ErrorKind::NotFound,
            Self::RestoreRequired { .. } => ErrorKind::Conflict,
            Self::HashMismatch { .. } | Self::InvalidArgument(_) | Self::NoBackend(_) => {
                ErrorKind::InvalidArgument
            }
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Backend { source, .. } => match source {
                BackendError::NotFound(_) => ErrorKind::NotFound,
                BackendError::InvalidKey(_) | BackendError::RestoreNotSupported => {
                    ErrorKind::InvalidArgument
                }
                BackendError::UnknownRestore(_) => ErrorKind::NotFound,
                BackendError::Io(_) | BackendError::Unavailable(_) => {
                    ErrorKind::StorageUnavailable
                }
            },
            Self::Timeout { .. } | Self::RestoreFailed { .. } | Self::Cancelled => {
                ErrorKind::StorageUnavailable
            }
            Self::Store(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type BlockResult<T> = Result<T, BlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_classify_by_source() {
        let io = BlockError::Backend {
            backend: "fs".into(),
            source: BackendError::Io(std::io::Error::other("disk")),
        };
        assert!(io.is_retryable());

        let missing = BlockError::Backend {
            backend: "fs".into(),
            source: BackendError::NotFound("k".into()),
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_errors_keep_their_kind() {
        let err: BlockError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn mismatch_is_caller_error() {
        let err = BlockError::HashMismatch {
            claimed: BlockId::from_hash([0; 32]),
            actual: BlockId::from_hash([1; 32]),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
