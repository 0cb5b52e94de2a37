//! Foundation types for Strata.
//!
//! This crate provides the identifier, tenancy, and configuration types used
//! throughout the Strata storage core. Every other Strata crate depends on
//! `strata-types`.
//!
//! # Key Types
//!
//! - [`NodeId`] -- SHA-1 content address of a directory or file node (40 hex)
//! - [`BlockId`] -- SHA-256 content address of a block (64 hex)
//! - [`CommitId`] -- salted SHA-1 commit identifier (40 hex)
//! - [`LibraryKey`] -- org-scoped library address
//! - [`StorageClass`] -- hot / cold / archive tier
//! - [`ErrorKind`] -- error taxonomy shared across crates
//! - [`StoreConfig`] -- immutable configuration passed to every component

pub mod config;
pub mod error;
pub mod object;
pub mod storage;
pub mod tenancy;

pub use config::{DedupConfig, RefCountConfig, RestoreConfig, RetentionConfig, StoreConfig};
pub use error::{ErrorKind, TypeError};
pub use object::{BlockId, CommitId, NodeId};
pub use storage::StorageClass;
pub use tenancy::{LibraryId, LibraryKey, OrgId};
