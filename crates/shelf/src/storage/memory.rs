//! In-memory storage implementation
//!
//! Used for tests and for running the engine without a database file.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::LibraryStore;
use crate::models::{CompositeKey, EntityKind, ProgressRecord, SavedEntry, SyncCursor};

/// In-memory implementation of LibraryStore
///
/// Uses BTreeMaps protected by RwLocks so listings come back in key order.
pub struct InMemoryLibraryStore {
    saved: RwLock<BTreeMap<CompositeKey, SavedEntry>>,
    progress: RwLock<BTreeMap<CompositeKey, ProgressRecord>>,
    cursors: RwLock<HashMap<(String, EntityKind), SyncCursor>>,
    selected_backend: RwLock<Option<String>>,
}

impl InMemoryLibraryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            saved: RwLock::new(BTreeMap::new()),
            progress: RwLock::new(BTreeMap::new()),
            cursors: RwLock::new(HashMap::new()),
            selected_backend: RwLock::new(None),
        }
    }
}

impl Default for InMemoryLibraryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Greatest version wins; ties go to the greater key so the answer is stable
fn latest_of<'a, T: 'a>(
    records: impl Iterator<Item = (&'a CompositeKey, &'a T)>,
    version: impl Fn(&T) -> DateTime<Utc>,
) -> Option<&'a T> {
    records
        .max_by(|(ka, a), (kb, b)| version(*a).cmp(&version(*b)).then_with(|| ka.cmp(kb)))
        .map(|(_, record)| record)
}

impl LibraryStore for InMemoryLibraryStore {
    fn list_saved(&self) -> Result<Vec<SavedEntry>> {
        let saved = self.saved.read().unwrap();
        Ok(saved.values().cloned().collect())
    }

    fn list_saved_since(&self, since: DateTime<Utc>) -> Result<Vec<SavedEntry>> {
        let saved = self.saved.read().unwrap();
        Ok(saved
            .values()
            .filter(|e| e.datetime > since)
            .cloned()
            .collect())
    }

    fn latest_saved(&self) -> Result<Option<SavedEntry>> {
        let saved = self.saved.read().unwrap();
        Ok(latest_of(saved.iter(), |e: &SavedEntry| e.datetime).cloned())
    }

    fn get_saved(&self, key: &CompositeKey) -> Result<Option<SavedEntry>> {
        let saved = self.saved.read().unwrap();
        Ok(saved.get(key).cloned())
    }

    fn upsert_saved_batch(&self, entries: Vec<SavedEntry>) -> Result<()> {
        let mut saved = self.saved.write().unwrap();
        for entry in entries {
            saved.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    fn delete_saved(&self, key: &CompositeKey) -> Result<()> {
        let mut saved = self.saved.write().unwrap();
        saved.remove(key);
        Ok(())
    }

    fn list_progress(&self) -> Result<Vec<ProgressRecord>> {
        let progress = self.progress.read().unwrap();
        Ok(progress.values().cloned().collect())
    }

    fn list_progress_since(&self, since: DateTime<Utc>) -> Result<Vec<ProgressRecord>> {
        let progress = self.progress.read().unwrap();
        Ok(progress
            .values()
            .filter(|r| r.datetime > since)
            .cloned()
            .collect())
    }

    fn latest_progress(&self) -> Result<Option<ProgressRecord>> {
        let progress = self.progress.read().unwrap();
        Ok(latest_of(progress.iter(), |r: &ProgressRecord| r.datetime).cloned())
    }

    fn get_progress(&self, key: &CompositeKey) -> Result<Option<ProgressRecord>> {
        let progress = self.progress.read().unwrap();
        Ok(progress.get(key).cloned())
    }

    fn upsert_progress_batch(&self, records: Vec<ProgressRecord>) -> Result<()> {
        let mut progress = self.progress.write().unwrap();
        for record in records {
            progress.insert(record.key.clone(), record);
        }
        Ok(())
    }

    fn delete_progress(&self, key: &CompositeKey) -> Result<()> {
        let mut progress = self.progress.write().unwrap();
        progress.remove(key);
        Ok(())
    }

    fn get_sync_cursor(&self, backend_id: &str, kind: EntityKind) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.read().unwrap();
        Ok(cursors.get(&(backend_id.to_string(), kind)).cloned())
    }

    fn save_sync_cursor(&self, cursor: SyncCursor) -> Result<()> {
        let mut cursors = self.cursors.write().unwrap();
        cursors.insert((cursor.backend_id.clone(), cursor.kind), cursor);
        Ok(())
    }

    fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>> {
        let cursors = self.cursors.read().unwrap();
        let mut list: Vec<SyncCursor> = cursors.values().cloned().collect();
        list.sort_by(|a, b| (&a.backend_id, a.kind).cmp(&(&b.backend_id, b.kind)));
        Ok(list)
    }

    fn clear_sync_cursors(&self) -> Result<()> {
        self.cursors.write().unwrap().clear();
        Ok(())
    }

    fn get_selected_backend(&self) -> Result<Option<String>> {
        Ok(self.selected_backend.read().unwrap().clone())
    }

    fn set_selected_backend(&self, backend_id: Option<&str>) -> Result<()> {
        *self.selected_backend.write().unwrap() = backend_id.map(str::to_string);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.saved.write().unwrap().clear();
        self.progress.write().unwrap().clear();
        self.cursors.write().unwrap().clear();
        *self.selected_backend.write().unwrap() = None;
        Ok(())
    }
}
