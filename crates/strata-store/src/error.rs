use strata_types::{ErrorKind, NodeId};

/// Errors from metadata store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested node was not found.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A node of one kind was requested but the stored node is the other kind.
    #[error("node {id} is not a {expected}")]
    WrongKind { id: NodeId, expected: &'static str },

    /// The backend rejected or failed the call; the call may be retried.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    /// The per-call deadline elapsed before the backend answered.
    #[error("metadata call {op} timed out after {after_ms} ms")]
    Timeout { op: &'static str, after_ms: u64 },

    /// A conditional write lost too many races in a row.
    #[error("row {key} is contended: gave up after {attempts} attempts")]
    Contended { key: String, attempts: u32 },

    /// The stored bytes are malformed or do not hash to their key.
    #[error("corrupt row {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The caller supplied a value that cannot be stored.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization failure on the write path.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Classify into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeNotFound(_) => ErrorKind::NotFound,
            Self::WrongKind { .. } | Self::InvalidArgument(_) | Self::Serialization(_) => {
                ErrorKind::InvalidArgument
            }
            Self::Unavailable(_) | Self::Timeout { .. } | Self::Contended { .. } => {
                ErrorKind::StorageUnavailable
            }
            Self::Corrupt { .. } => ErrorKind::Corrupt,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable() {
        let err = StoreError::Timeout {
            op: "get",
            after_ms: 10,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn corrupt_fails_closed() {
        let err = StoreError::Corrupt {
            key: "k".into(),
            reason: "bad json".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(!err.is_retryable());
    }
}
