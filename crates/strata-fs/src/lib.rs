//! Filesystem view of Strata libraries.
//!
//! A library is a chain of commits, each naming the root of an immutable
//! tree of directory and file nodes. This crate resolves paths against a
//! root, rewrites trees copy-on-write, and turns every mutation into a new
//! commit guarded by a compare-and-set on the library head.
//!
//! # Components
//!
//! - [`FileSystem`] -- mkdir / create / update / rename / delete / move /
//!   copy / revert, plus listing, stat, history and diff
//! - [`PathResolver`] -- walks a [`FsPath`] and returns the ancestor chain
//! - [`TreeMutator`] -- rebuilds an edited path up to a new root, including
//!   two-directory edits joined at their lowest common ancestor
//! - [`entries`] -- sorted entry list primitives
//! - [`diff_trees`] -- change list between two roots

pub mod diff;
pub mod entries;
pub mod error;
pub mod fs;
pub mod names;
pub mod path;
pub mod rebuild;
pub mod traverse;

pub use diff::{diff_trees, TreeChange, TreeDiff};
pub use error::{FsError, FsResult};
pub use fs::{Change, FileSystem};
pub use names::{validate_entry_name, MAX_NAME_LEN};
pub use path::FsPath;
pub use rebuild::TreeMutator;
pub use traverse::{Ancestor, PathResolver, PathTraverseResult};
