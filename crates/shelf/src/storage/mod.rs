//! Storage traits and implementations
//!
//! This module defines the local store abstraction the sync engine writes
//! through. The trait-based design allows swapping between in-memory and
//! SQLite implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryLibraryStore;
pub use sqlite::SqliteLibraryStore;
pub use traits::LibraryStore;
