//! Block storage for Strata.
//!
//! Blocks are immutable byte strings addressed by their SHA-256. Each org
//! has its own dedup domain: uploading content the org already stores only
//! moves a reference count. Bytes live in pluggable [`BlobBackend`]s, one
//! per [`StorageClass`](strata_types::StorageClass); metadata rows live in
//! the column store.
//!
//! # Components
//!
//! - [`BlockStore`] -- put / get / dedup checks / reference counts / sweep
//! - [`BackendRegistry`] -- storage class to backend mapping
//! - [`RestoreManager`] -- resumable archival restore jobs
//! - [`backends`] -- in-memory and local filesystem backends
//!
//! # Design Rules
//!
//! 1. The server always hashes uploaded bytes itself.
//! 2. Write-then-link: bytes are stored before the row that names them.
//! 3. Only the sweeper deletes bytes, and only after a grace period at zero.
//! 4. Reads verify content against the id and fail closed.

pub mod backend;
pub mod backends;
pub mod error;
pub mod record;
pub mod registry;
pub mod restore;
pub mod store;

pub use backend::{BlobBackend, RestoreStatus};
pub use error::{BackendError, BackendResult, BlockError, BlockResult};
pub use record::{blob_key, BlockRecord};
pub use registry::BackendRegistry;
pub use restore::{RestoreJob, RestoreManager, RestoreState};
pub use store::{BlockStore, CountChange, PutOutcome, SweepReport};
