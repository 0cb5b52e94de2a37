//! Metadata storage for Strata.
//!
//! Strata keeps all metadata in a column-family store that offers single-row
//! atomicity and nothing more. This crate defines that seam, a deadline-aware
//! typed wrapper around it, and the content-addressed node model built on
//! top.
//!
//! # Layers
//!
//! - [`ColumnStore`] -- async trait over `(family, partition, key)` rows
//! - [`InMemoryColumnStore`] -- in-process backend with failure injection
//! - [`Tables`] -- JSON rows, per-call timeouts, CAS read-modify-write
//! - [`ObjectStore`] -- immutable directory and file nodes keyed by SHA-1
//!
//! # Design Rules
//!
//! 1. Nodes are immutable; writes are `put_if_absent`.
//! 2. A node read back is re-hashed; a mismatch is [`StoreError::Corrupt`].
//! 3. No operation relies on more than one row changing atomically.
//! 4. Every backend call carries a deadline.

pub mod error;
pub mod memory;
pub mod node;
pub mod objects;
pub mod tables;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryColumnStore;
pub use node::{DirEntry, Directory, EntryMode, FileNode, Node};
pub use objects::ObjectStore;
pub use tables::{Row, Tables, MAX_CAS_ATTEMPTS};
pub use traits::{ColumnStore, Family};
