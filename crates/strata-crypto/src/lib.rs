//! Hashing primitives for Strata.
//!
//! Provides the protocol-fixed digests (SHA-1 node and commit ids, SHA-256
//! block ids) and commit lineage verification.
//!
//! All digests wrap established libraries; no custom cryptography.

pub mod chain;
pub mod hasher;

pub use chain::{ChainError, HasParent, LineageVerifier};
pub use hasher::{ContentHasher, HasherError, NODE_FORMAT_VERSION};
