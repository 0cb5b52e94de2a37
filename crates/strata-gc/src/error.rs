//! Error types for background reference-count work.

use strata_blocks::BlockError;
use strata_refs::RefError;
use strata_store::StoreError;
use strata_types::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GcError {
    /// Another worker took the task over after our lease expired.
    #[error("lease on task {0} was lost")]
    LeaseLost(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Ref(#[from] RefError),
}

impl GcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LeaseLost(_) => ErrorKind::Conflict,
            Self::TaskNotFound(_) => ErrorKind::NotFound,
            Self::Store(e) => e.kind(),
            Self::Block(e) => e.kind(),
            Self::Ref(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type GcResult<T> = Result<T, GcError>;
