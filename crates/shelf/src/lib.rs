//! Shelf crate - Library sync engine
//!
//! This crate keeps a reader's library consistent across devices:
//! - Domain models (SavedEntry, ProgressRecord, CompositeKey, SyncCursor)
//! - Local storage trait with in-memory and SQLite implementations
//! - Remote backends over a REST API and a managed database API
//! - Last-write-wins reconciliation with full and incremental passes
//! - Backend selection and sync notifications
//! - Unread-update refresh against content sources
//!
//! All I/O is synchronous so the engine can be driven from any executor.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;
pub mod updates;

pub use backend::{
    Backend, InMemoryBackend, ManagedBackend, RemoteCollection, RestBackend, Session,
    StaticSession, StoredSession, StoredToken,
};
pub use crate::config::{BackendCredentials, ManagedCredentials, RestCredentials, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use models::{CompositeKey, EntityKind, ProgressRecord, Record, SavedEntry, SyncCursor};
pub use storage::{InMemoryLibraryStore, LibraryStore, SqliteLibraryStore};
pub use sync::{
    // Reconciliation
    EntitySyncStats, SyncCoordinator, SyncMode, SyncOptions, SyncOutcome, SyncReport,
    // Backend selection and notifications
    EngineSelector, EventBus, EventLog, SyncEvent, SyncObserver,
    // Conflict resolution
    Decision, Side, SyncEntity, resolve,
    // Cooldown management
    cooldown_elapsed, cooldown_remaining,
};
pub use updates::{ChapterSource, UpdateReport, mark_seen, refresh_updates};
