//! Commits and library heads for Strata.
//!
//! Every library owns a linear chain of immutable [`Commit`]s, each naming
//! the root directory node of one snapshot. The library row points at the
//! newest commit. Because the metadata store has no multi-row transactions,
//! that pointer only moves by compare-and-set on the commit the writer
//! planned against.
//!
//! # Components
//!
//! - [`CommitLog`] -- create, read, walk and verify commit chains
//! - [`LibraryHeads`] -- library rows, head compare-and-set, aggregate stats

pub mod commits;
pub mod error;
pub mod heads;
pub mod types;

pub use commits::CommitLog;
pub use error::{RefError, Result};
pub use heads::{validate_library_name, LibraryHeads, MAX_LIBRARY_NAME_LEN};
pub use types::{Commit, Encryption, Library, NewLibrary, StatsDelta};
