//! Storage trait definitions

use crate::models::{CompositeKey, EntityKind, ProgressRecord, SavedEntry, SyncCursor};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trait for local library storage
///
/// This trait abstracts over different storage backends (in-memory, SQLite)
/// and provides the operations the sync engine needs for each entity kind.
/// Batch writes must be atomic: either every record in the batch lands or
/// none does.
pub trait LibraryStore: Send + Sync {
    // === Saved entries ===

    /// List every saved entry, ordered by key
    fn list_saved(&self) -> Result<Vec<SavedEntry>>;

    /// List saved entries whose version is strictly newer than `since`
    fn list_saved_since(&self, since: DateTime<Utc>) -> Result<Vec<SavedEntry>>;

    /// The saved entry with the greatest version, if any
    fn latest_saved(&self) -> Result<Option<SavedEntry>>;

    /// Get a saved entry by key
    fn get_saved(&self, key: &CompositeKey) -> Result<Option<SavedEntry>>;

    /// Insert or replace a batch of saved entries
    fn upsert_saved_batch(&self, entries: Vec<SavedEntry>) -> Result<()>;

    /// Delete a saved entry (no-op if absent)
    fn delete_saved(&self, key: &CompositeKey) -> Result<()>;

    // === Progress records ===

    /// List every progress record, ordered by key
    fn list_progress(&self) -> Result<Vec<ProgressRecord>>;

    /// List progress records whose version is strictly newer than `since`
    fn list_progress_since(&self, since: DateTime<Utc>) -> Result<Vec<ProgressRecord>>;

    /// The progress record with the greatest version, if any
    fn latest_progress(&self) -> Result<Option<ProgressRecord>>;

    /// Get a progress record by key
    fn get_progress(&self, key: &CompositeKey) -> Result<Option<ProgressRecord>>;

    /// Insert or replace a batch of progress records
    fn upsert_progress_batch(&self, records: Vec<ProgressRecord>) -> Result<()>;

    /// Delete a progress record (no-op if absent)
    fn delete_progress(&self, key: &CompositeKey) -> Result<()>;

    // === Sync state ===

    /// Get the cursor for a backend and entity kind
    fn get_sync_cursor(&self, backend_id: &str, kind: EntityKind) -> Result<Option<SyncCursor>>;

    /// Save a cursor (upsert)
    fn save_sync_cursor(&self, cursor: SyncCursor) -> Result<()>;

    /// List every stored cursor
    fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>>;

    /// Delete every cursor for every backend
    fn clear_sync_cursors(&self) -> Result<()>;

    /// Identifier of the backend the user last selected
    fn get_selected_backend(&self) -> Result<Option<String>>;

    /// Persist the selected backend (`None` = signed out)
    fn set_selected_backend(&self, backend_id: Option<&str>) -> Result<()>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
