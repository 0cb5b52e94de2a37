//! Concrete [`BlobBackend`](crate::BlobBackend) implementations.

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemBackend;
pub use memory::InMemoryBackend;
