//! Holocron Storage - Storage backends for the relationship engine
//!
//! This crate defines the backend contract (reads, edge lookups and
//! transactional units of work) and provides the in-memory backend.

#![allow(clippy::result_large_err)]

pub mod edge_table;
pub mod error;
pub mod memory;
pub mod traits;

pub use edge_table::EdgeTable;
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryStorage, StorageConfig};
pub use traits::{StorageBackend, UnitOfWork};
