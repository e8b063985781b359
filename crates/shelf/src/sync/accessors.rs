//! Per-kind accessors that let one reconciliation routine serve both
//! entity kinds

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::backend::{Backend, RemoteCollection};
use crate::models::{CompositeKey, ProgressRecord, Record, SavedEntry};
use crate::storage::LibraryStore;

/// Local-store and backend plumbing for one entity kind
pub trait SyncEntity: Record {
    fn load_all(store: &dyn LibraryStore) -> Result<Vec<Self>>;

    fn load_since(store: &dyn LibraryStore, since: DateTime<Utc>) -> Result<Vec<Self>>;

    fn load_latest(store: &dyn LibraryStore) -> Result<Option<Self>>;

    fn store_batch(store: &dyn LibraryStore, records: Vec<Self>) -> Result<()>;

    fn delete_local(store: &dyn LibraryStore, key: &CompositeKey) -> Result<()>;

    /// This kind's collection on `backend`
    fn remote(backend: &dyn Backend) -> &dyn RemoteCollection<Self>;
}

impl SyncEntity for SavedEntry {
    fn load_all(store: &dyn LibraryStore) -> Result<Vec<Self>> {
        store.list_saved()
    }

    fn load_since(store: &dyn LibraryStore, since: DateTime<Utc>) -> Result<Vec<Self>> {
        store.list_saved_since(since)
    }

    fn load_latest(store: &dyn LibraryStore) -> Result<Option<Self>> {
        store.latest_saved()
    }

    fn store_batch(store: &dyn LibraryStore, records: Vec<Self>) -> Result<()> {
        store.upsert_saved_batch(records)
    }

    fn delete_local(store: &dyn LibraryStore, key: &CompositeKey) -> Result<()> {
        store.delete_saved(key)
    }

    fn remote(backend: &dyn Backend) -> &dyn RemoteCollection<Self> {
        backend.saved()
    }
}

impl SyncEntity for ProgressRecord {
    fn load_all(store: &dyn LibraryStore) -> Result<Vec<Self>> {
        store.list_progress()
    }

    fn load_since(store: &dyn LibraryStore, since: DateTime<Utc>) -> Result<Vec<Self>> {
        store.list_progress_since(since)
    }

    fn load_latest(store: &dyn LibraryStore) -> Result<Option<Self>> {
        store.latest_progress()
    }

    fn store_batch(store: &dyn LibraryStore, records: Vec<Self>) -> Result<()> {
        store.upsert_progress_batch(records)
    }

    fn delete_local(store: &dyn LibraryStore, key: &CompositeKey) -> Result<()> {
        store.delete_progress(key)
    }

    fn remote(backend: &dyn Backend) -> &dyn RemoteCollection<Self> {
        backend.progress()
    }
}
