//! In-memory backend
//!
//! A remote double for tests and offline use. Listings are served through the
//! same [`Pager`] the HTTP backends use, every operation is counted, and a
//! failure can be injected to exercise error paths.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::pager::Pager;
use super::{Backend, RemoteCollection};
use crate::error::{SyncError, SyncResult};
use crate::models::version::to_millis;
use crate::models::{CompositeKey, ProgressRecord, Record, SavedEntry};

/// Number of calls made to each operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_latest: usize,
    pub fetch_all_keys: usize,
    pub fetch_since: usize,
    pub push: usize,
    pub delete: usize,
    pub digest: usize,
    /// Page requests issued by listings
    pub pages: usize,
    /// Records received through `push`
    pub pushed_records: usize,
}

impl CallCounts {
    /// Every operation call (pages excluded)
    pub fn total(&self) -> usize {
        self.fetch_latest
            + self.fetch_all_keys
            + self.fetch_since
            + self.push
            + self.delete
            + self.digest
    }
}

/// One remote collection held in memory
pub struct InMemoryCollection<E> {
    records: RwLock<BTreeMap<CompositeKey, E>>,
    counts: Mutex<CallCounts>,
    failure: Mutex<Option<SyncError>>,
    pager: Pager,
    digest_enabled: bool,
}

impl<E: Record> InMemoryCollection<E> {
    pub fn new(page_size: usize, digest_enabled: bool) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            counts: Mutex::new(CallCounts::default()),
            failure: Mutex::new(None),
            pager: Pager::new(page_size),
            digest_enabled,
        }
    }

    /// Seed records directly, bypassing counters
    pub fn insert(&self, records: impl IntoIterator<Item = E>) {
        let mut map = self.records.write().unwrap();
        for record in records {
            map.insert(record.key().clone(), record);
        }
    }

    /// Remove a record directly, as if another device deleted it
    pub fn remove(&self, key: &CompositeKey) {
        self.records.write().unwrap().remove(key);
    }

    pub fn get(&self, key: &CompositeKey) -> Option<E> {
        self.records.read().unwrap().get(key).cloned()
    }

    /// Every record, in key order
    pub fn records(&self) -> Vec<E> {
        self.records.read().unwrap().values().cloned().collect()
    }

    pub fn counts(&self) -> CallCounts {
        self.counts.lock().unwrap().clone()
    }

    pub fn reset_counts(&self) {
        *self.counts.lock().unwrap() = CallCounts::default();
    }

    /// Make every subsequent operation fail with `error`
    pub fn fail_with(&self, error: SyncError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Count a call and surface any injected failure
    fn enter(&self, count: impl FnOnce(&mut CallCounts)) -> SyncResult<()> {
        count(&mut *self.counts.lock().unwrap());
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Serve a filtered listing page by page
    fn paged<T: Clone>(&self, rows: Vec<T>) -> Vec<T> {
        let result: Result<Vec<T>, SyncError> = self.pager.drain(|page| {
            self.counts.lock().unwrap().pages += 1;
            let end = (page.offset + page.limit).min(rows.len());
            let start = page.offset.min(end);
            Ok(rows[start..end].to_vec())
        });
        result.unwrap_or_default()
    }
}

impl<E: Record> RemoteCollection<E> for InMemoryCollection<E> {
    fn fetch_latest(&self) -> SyncResult<Option<E>> {
        self.enter(|c| c.fetch_latest += 1)?;
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .max_by(|(ka, a), (kb, b)| a.version().cmp(&b.version()).then_with(|| ka.cmp(kb)))
            .map(|(_, record)| record.clone()))
    }

    fn fetch_all_keys(&self) -> SyncResult<BTreeSet<CompositeKey>> {
        self.enter(|c| c.fetch_all_keys += 1)?;
        let keys: Vec<CompositeKey> = self.records.read().unwrap().keys().cloned().collect();
        Ok(self.paged(keys).into_iter().collect())
    }

    fn fetch_since(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<E>> {
        self.enter(|c| c.fetch_since += 1)?;
        let rows: Vec<E> = self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| since.is_none_or(|since| r.version() > since))
            .cloned()
            .collect();
        Ok(self.paged(rows))
    }

    fn push(&self, records: &[E]) -> SyncResult<()> {
        self.enter(|c| {
            c.push += 1;
            c.pushed_records += records.len();
        })?;
        self.insert(records.iter().cloned());
        Ok(())
    }

    fn delete(&self, keys: &[CompositeKey]) -> SyncResult<()> {
        self.enter(|c| c.delete += 1)?;
        let mut map = self.records.write().unwrap();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    fn digest(&self) -> SyncResult<Option<String>> {
        self.enter(|c| c.digest += 1)?;
        if !self.digest_enabled {
            return Ok(None);
        }
        let mut hasher = DefaultHasher::new();
        for (key, record) in self.records.read().unwrap().iter() {
            key.hash(&mut hasher);
            to_millis(record.version()).hash(&mut hasher);
        }
        Ok(Some(format!("{:016x}", hasher.finish())))
    }
}

/// Backend whose remote copy lives in process memory
pub struct InMemoryBackend {
    id: String,
    saved: InMemoryCollection<SavedEntry>,
    progress: InMemoryCollection<ProgressRecord>,
}

impl InMemoryBackend {
    pub const DEFAULT_PAGE_SIZE: usize = 50;

    pub fn new(id: impl Into<String>) -> Self {
        Self::with_options(id, Self::DEFAULT_PAGE_SIZE, false)
    }

    /// Configure the listing page size and whether collections report a digest
    pub fn with_options(id: impl Into<String>, page_size: usize, digest_enabled: bool) -> Self {
        Self {
            id: id.into(),
            saved: InMemoryCollection::new(page_size, digest_enabled),
            progress: InMemoryCollection::new(page_size, digest_enabled),
        }
    }

    pub fn saved_remote(&self) -> &InMemoryCollection<SavedEntry> {
        &self.saved
    }

    pub fn progress_remote(&self) -> &InMemoryCollection<ProgressRecord> {
        &self.progress
    }

    pub fn reset_counts(&self) {
        self.saved.reset_counts();
        self.progress.reset_counts();
    }
}

impl Backend for InMemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn saved(&self) -> &dyn RemoteCollection<SavedEntry> {
        &self.saved
    }

    fn progress(&self) -> &dyn RemoteCollection<ProgressRecord> {
        &self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::version::from_millis;

    fn entry(manga: &str, ms: i64) -> SavedEntry {
        SavedEntry::new((manga, "p1")).with_datetime(from_millis(ms).unwrap())
    }

    #[test]
    fn test_fetch_since_pages_through_everything() {
        let backend = InMemoryBackend::with_options("mem", 10, false);
        backend
            .saved_remote()
            .insert((0..25).map(|i| entry(&format!("m{:02}", i), 100 + i)));

        let all = backend.saved().fetch_since(None).unwrap();
        assert_eq!(all.len(), 25);
        assert_eq!(backend.saved_remote().counts().pages, 3);

        let recent = backend.saved().fetch_since(from_millis(119)).unwrap();
        assert_eq!(recent.len(), 5);
    }

    #[test]
    fn test_latest() {
        let backend = InMemoryBackend::new("mem");
        assert!(backend.saved().fetch_latest().unwrap().is_none());

        backend.saved_remote().insert([entry("m1", 300), entry("m2", 100)]);
        let latest = backend.saved().fetch_latest().unwrap().unwrap();
        assert_eq!(latest.key.manga_id, "m1");
    }

    #[test]
    fn test_injected_failure() {
        let backend = InMemoryBackend::new("mem");
        backend
            .progress_remote()
            .fail_with(SyncError::transport("offline"));

        assert_eq!(
            backend.progress().fetch_all_keys(),
            Err(SyncError::transport("offline"))
        );
        assert_eq!(backend.progress_remote().counts().fetch_all_keys, 1);

        backend.progress_remote().clear_failure();
        assert!(backend.progress().fetch_all_keys().unwrap().is_empty());
    }

    #[test]
    fn test_digest_tracks_content() {
        let backend = InMemoryBackend::with_options("mem", 50, true);
        let empty = backend.saved().digest().unwrap();
        backend.saved_remote().insert([entry("m1", 1)]);
        let one = backend.saved().digest().unwrap();
        assert!(one.is_some());
        assert_ne!(empty, one);
        assert_eq!(one, backend.saved().digest().unwrap());

        let plain = InMemoryBackend::new("mem");
        assert_eq!(plain.saved().digest().unwrap(), None);
    }

    #[test]
    fn test_push_and_delete() {
        let backend = InMemoryBackend::new("mem");
        backend.saved().push(&[entry("m1", 1), entry("m2", 2)]).unwrap();
        backend
            .saved()
            .delete(&[CompositeKey::new("m1", "p1")])
            .unwrap();

        let remaining = backend.saved_remote().records();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key.manga_id, "m2");

        let counts = backend.saved_remote().counts();
        assert_eq!(counts.push, 1);
        assert_eq!(counts.pushed_records, 2);
        assert_eq!(counts.delete, 1);
        assert_eq!(counts.total(), 2);
    }
}
