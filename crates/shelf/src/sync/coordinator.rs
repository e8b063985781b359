//! Sync coordinator
//!
//! Runs the reconciliation protocol for each entity kind against the active
//! backend. A pass either completes and advances the kind's cursor, or fails
//! and leaves the cursor alone so the next pass redoes the same window. Push
//! and apply are idempotent, so redoing work is always safe.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::accessors::SyncEntity;
use super::events::SyncEvent;
use super::resolver::{Decision, Side, resolve};
use super::selector::EngineSelector;
use super::timing::cooldown_elapsed;
use crate::backend::{Backend, RemoteCollection};
use crate::error::{SyncError, SyncResult};
use crate::models::version::now_millis;
use crate::models::{
    CompositeKey, EntityKind, ProgressRecord, SavedEntry, SyncCursor, versions_match,
};
use crate::storage::LibraryStore;

/// Which protocol a pass ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Complete key-set comparison
    Full,
    /// Exchange of records changed since the cursor
    Incremental,
    /// Latest records already matched; nothing exchanged
    UpToDate,
}

/// Statistics from one entity kind's pass
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySyncStats {
    pub kind: EntityKind,
    pub mode: SyncMode,
    /// Records received from the backend
    pub fetched: usize,
    /// Records pushed to the backend
    pub pushed: usize,
    /// Remote records written to the local store
    pub applied: usize,
    /// Local records removed because the backend no longer has them
    pub deleted_locally: usize,
    /// Duration of the pass
    pub duration_ms: u64,
}

impl EntitySyncStats {
    fn new(kind: EntityKind, mode: SyncMode) -> Self {
        Self {
            kind,
            mode,
            fetched: 0,
            pushed: 0,
            applied: 0,
            deleted_locally: 0,
            duration_ms: 0,
        }
    }

    /// Whether the pass changed either replica
    pub fn changed_anything(&self) -> bool {
        self.pushed + self.applied + self.deleted_locally > 0
    }
}

/// Per-kind results of one sync invocation
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub backend: String,
    pub saved: SyncResult<EntitySyncStats>,
    pub progress: SyncResult<EntitySyncStats>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.saved.is_ok() && self.progress.is_ok()
    }

    /// Failures by kind
    pub fn errors(&self) -> Vec<(EntityKind, &SyncError)> {
        let mut errors = Vec::new();
        if let Err(e) = &self.saved {
            errors.push((EntityKind::Saved, e));
        }
        if let Err(e) = &self.progress {
            errors.push((EntityKind::Progress, e));
        }
        errors
    }
}

/// Result of asking the coordinator to sync
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// No backend is selected; nothing happened
    NotConfigured,
    Completed(SyncReport),
}

/// Options for the coordinator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Run the two entity kinds concurrently
    pub parallel: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

type FlightKey = (String, EntityKind);

/// Marks one (backend, kind) pair busy until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<FlightKey>>,
    key: FlightKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

/// Orchestrates sync passes against the active backend
pub struct SyncCoordinator {
    store: Arc<dyn LibraryStore>,
    selector: Arc<EngineSelector>,
    options: SyncOptions,
    in_flight: Mutex<HashSet<FlightKey>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        selector: Arc<EngineSelector>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            selector,
            options,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn selector(&self) -> &Arc<EngineSelector> {
        &self.selector
    }

    /// Sync both kinds: incremental where a cursor exists, full otherwise
    pub fn sync(&self) -> SyncOutcome {
        self.run(false)
    }

    /// Force a full reconciliation of both kinds
    pub fn reconcile(&self) -> SyncOutcome {
        self.run(true)
    }

    /// Sync only if `cooldown_secs` have passed since the last successful pass
    ///
    /// Returns `None` while cooling down.
    pub fn sync_if_due(&self, cooldown_secs: u64) -> SyncResult<Option<SyncOutcome>> {
        let Some(backend) = self.selector.active() else {
            return Ok(Some(SyncOutcome::NotConfigured));
        };
        let last = self.last_synced_at(backend.id())?;
        if !cooldown_elapsed(last, cooldown_secs) {
            debug!("Sync skipped: cooling down");
            return Ok(None);
        }
        Ok(Some(self.sync()))
    }

    /// Oldest cursor time across both kinds; `None` if any kind never synced
    pub fn last_synced_at(&self, backend_id: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let mut oldest: Option<DateTime<Utc>> = None;
        for kind in EntityKind::ALL {
            let Some(at) = self
                .store
                .get_sync_cursor(backend_id, kind)?
                .and_then(|c| c.last_sync_at)
            else {
                return Ok(None);
            };
            oldest = Some(oldest.map_or(at, |o| o.min(at)));
        }
        Ok(oldest)
    }

    fn run(&self, force_full: bool) -> SyncOutcome {
        let Some(backend) = self.selector.active() else {
            debug!("Sync requested with no backend selected");
            return SyncOutcome::NotConfigured;
        };
        let backend: &dyn Backend = backend.as_ref();

        let (saved, progress) = if self.options.parallel {
            rayon::join(
                || self.sync_kind::<SavedEntry>(backend, force_full),
                || self.sync_kind::<ProgressRecord>(backend, force_full),
            )
        } else {
            (
                self.sync_kind::<SavedEntry>(backend, force_full),
                self.sync_kind::<ProgressRecord>(backend, force_full),
            )
        };

        SyncOutcome::Completed(SyncReport {
            backend: backend.id().to_string(),
            saved,
            progress,
        })
    }

    /// Run one kind's pass against `backend`
    ///
    /// Fails with [`SyncError::SyncInProgress`] if a pass for the same
    /// backend and kind is already running.
    pub fn sync_kind<E: SyncEntity>(
        &self,
        backend: &dyn Backend,
        force_full: bool,
    ) -> SyncResult<EntitySyncStats> {
        let _flight = self.begin(backend.id(), E::KIND)?;
        let events = self.selector.events();
        events.emit(SyncEvent::SyncStarted {
            backend: backend.id().to_string(),
            kind: E::KIND,
        });

        let start = Instant::now();
        let result = self.run_kind::<E>(backend, force_full).map(|mut stats| {
            stats.duration_ms = start.elapsed().as_millis() as u64;
            stats
        });

        match &result {
            Ok(stats) => {
                info!(
                    "Synced {} with {} ({:?}): pushed={} applied={} deleted={} in {}ms",
                    E::KIND,
                    backend.id(),
                    stats.mode,
                    stats.pushed,
                    stats.applied,
                    stats.deleted_locally,
                    stats.duration_ms
                );
                events.emit(SyncEvent::SyncCompleted {
                    backend: backend.id().to_string(),
                    kind: E::KIND,
                    stats: stats.clone(),
                });
            }
            Err(e) => {
                warn!("Sync of {} with {} failed: {}", E::KIND, backend.id(), e);
                events.emit(SyncEvent::SyncFailed {
                    backend: backend.id().to_string(),
                    kind: E::KIND,
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Delete a record locally and on the active backend
    ///
    /// The remote copy goes first; if that fails the local record stays.
    pub fn remove<E: SyncEntity>(&self, key: &CompositeKey) -> SyncResult<()> {
        if let Some(backend) = self.selector.active() {
            E::remote(backend.as_ref()).delete(std::slice::from_ref(key))?;
        }
        E::delete_local(self.store.as_ref(), key)?;
        Ok(())
    }

    fn begin(&self, backend_id: &str, kind: EntityKind) -> SyncResult<InFlight<'_>> {
        let key = (backend_id.to_string(), kind);
        let mut set = self.in_flight.lock().unwrap();
        if !set.insert(key.clone()) {
            return Err(SyncError::SyncInProgress {
                backend: backend_id.to_string(),
                kind,
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            key,
        })
    }

    fn run_kind<E: SyncEntity>(
        &self,
        backend: &dyn Backend,
        force_full: bool,
    ) -> SyncResult<EntitySyncStats> {
        let cursor = self
            .store
            .get_sync_cursor(backend.id(), E::KIND)?
            .unwrap_or_else(|| SyncCursor::pending(backend.id(), E::KIND));

        match cursor.last_sync_at {
            Some(since) if !force_full => self.incremental::<E>(backend, cursor, since),
            _ => self.full_reconcile::<E>(backend, cursor),
        }
    }

    /// Compare complete key sets and converge both replicas
    fn full_reconcile<E: SyncEntity>(
        &self,
        backend: &dyn Backend,
        cursor: SyncCursor,
    ) -> SyncResult<EntitySyncStats> {
        let store = self.store.as_ref();
        let remote = E::remote(backend);
        let pass_started = now_millis();
        let mut stats = EntitySyncStats::new(E::KIND, SyncMode::Full);

        // Read before any listing so a concurrent write shows up as a digest
        // change on the next pass
        let digest = self.read_digest(remote);

        // One download serves as both the key set and the records
        let remote_records: BTreeMap<CompositeKey, E> = remote
            .fetch_since(None)?
            .into_iter()
            .map(|r| (r.key().clone(), r))
            .collect();
        stats.fetched = remote_records.len();

        // Local keys the backend doesn't know: written offline, or deleted
        // elsewhere. Without a horizon this device never synced, so nothing
        // can have been deleted elsewhere yet.
        let mut upload: BTreeMap<CompositeKey, E> = BTreeMap::new();
        let mut shared: BTreeMap<CompositeKey, E> = BTreeMap::new();
        for record in E::load_all(store)? {
            let key = record.key().clone();
            if remote_records.contains_key(&key) {
                shared.insert(key, record);
            } else if cursor
                .offline_horizon
                .is_none_or(|horizon| record.version() > horizon)
            {
                upload.insert(key, record);
            } else {
                E::delete_local(store, &key)?;
                stats.deleted_locally += 1;
            }
        }

        let mut apply: BTreeMap<CompositeKey, E> = BTreeMap::new();
        for (key, remote_record) in &remote_records {
            match resolve(shared.get(key), Some(remote_record)) {
                Decision::KeepLocal => {
                    if let Some(local) = shared.remove(key) {
                        upload.insert(key.clone(), local);
                    }
                }
                Decision::KeepRemote | Decision::NoConflict(Side::Remote) => {
                    apply.insert(key.clone(), remote_record.clone());
                }
                Decision::Converged | Decision::NoConflict(Side::Local) => {}
            }
        }

        // Local writes that landed while this pass was running
        for record in E::load_since(store, pass_started)? {
            let key = record.key().clone();
            match resolve(Some(&record), remote_records.get(&key)) {
                Decision::KeepLocal | Decision::NoConflict(Side::Local) => {
                    apply.remove(&key);
                    upload.insert(key, record);
                }
                _ => {}
            }
        }

        self.exchange::<E>(remote, upload, apply, &mut stats)?;

        self.store
            .save_sync_cursor(cursor.advanced(pass_started, digest))?;
        Ok(stats)
    }

    /// Exchange records changed since `since`
    fn incremental<E: SyncEntity>(
        &self,
        backend: &dyn Backend,
        cursor: SyncCursor,
        since: DateTime<Utc>,
    ) -> SyncResult<EntitySyncStats> {
        let store = self.store.as_ref();
        let remote = E::remote(backend);
        let pass_started = now_millis();

        let remote_latest = remote.fetch_latest()?;
        let local_latest = E::load_latest(store)?;
        if latest_matches(local_latest.as_ref(), remote_latest.as_ref()) {
            debug!("{} already in sync with {}", E::KIND, backend.id());
            let digest = cursor.remote_digest.clone();
            self.store
                .save_sync_cursor(cursor.advanced(pass_started, digest))?;
            return Ok(EntitySyncStats::new(E::KIND, SyncMode::UpToDate));
        }

        let mut stats = EntitySyncStats::new(E::KIND, SyncMode::Incremental);

        let local_changes: BTreeMap<CompositeKey, E> = E::load_since(store, since)?
            .into_iter()
            .map(|r| (r.key().clone(), r))
            .collect();

        // Captured before the remote read; a write racing this pass then
        // differs from the stored digest next time
        let digest = self.read_digest(remote);
        let remote_moved = remote_latest
            .as_ref()
            .is_some_and(|latest| latest.version() > since);
        let remote_unchanged =
            !remote_moved && digest.is_some() && digest == cursor.remote_digest;
        let remote_changes: BTreeMap<CompositeKey, E> = if remote_unchanged {
            debug!("{} digest unchanged on {}", E::KIND, backend.id());
            BTreeMap::new()
        } else {
            remote
                .fetch_since(Some(since))?
                .into_iter()
                .map(|r| (r.key().clone(), r))
                .collect()
        };
        stats.fetched = remote_changes.len();

        // A side without a change for a key holds a version at or before the
        // cursor, so the changed side wins
        let keys: BTreeSet<&CompositeKey> =
            local_changes.keys().chain(remote_changes.keys()).collect();
        let mut upload = BTreeMap::new();
        let mut apply = BTreeMap::new();
        for key in keys {
            let local = local_changes.get(key);
            let remote_record = remote_changes.get(key);
            match resolve(local, remote_record) {
                Decision::KeepLocal | Decision::NoConflict(Side::Local) => {
                    if let Some(local) = local {
                        upload.insert(key.clone(), local.clone());
                    }
                }
                Decision::KeepRemote | Decision::NoConflict(Side::Remote) => {
                    if let Some(remote_record) = remote_record {
                        apply.insert(key.clone(), remote_record.clone());
                    }
                }
                Decision::Converged => {}
            }
        }

        self.exchange::<E>(remote, upload, apply, &mut stats)?;

        self.store
            .save_sync_cursor(cursor.advanced(pass_started, digest))?;
        Ok(stats)
    }

    /// Push the upload set, then apply the apply set locally
    fn exchange<E: SyncEntity>(
        &self,
        remote: &dyn RemoteCollection<E>,
        upload: BTreeMap<CompositeKey, E>,
        apply: BTreeMap<CompositeKey, E>,
        stats: &mut EntitySyncStats,
    ) -> SyncResult<()> {
        if !upload.is_empty() {
            let records: Vec<E> = upload.into_values().collect();
            remote.push(&records)?;
            stats.pushed = records.len();
        }
        if !apply.is_empty() {
            let records: Vec<E> = apply.into_values().collect();
            stats.applied = records.len();
            E::store_batch(self.store.as_ref(), records)?;
        }
        Ok(())
    }

    /// Digest of the remote collection; failures just disable the shortcut
    fn read_digest<E>(&self, remote: &dyn RemoteCollection<E>) -> Option<String> {
        match remote.digest() {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Could not read remote digest: {}", e);
                None
            }
        }
    }
}

/// Same key and same version (within epsilon) on both sides
fn latest_matches<E: SyncEntity>(local: Option<&E>, remote: Option<&E>) -> bool {
    match (local, remote) {
        (None, None) => true,
        (Some(l), Some(r)) => l.key() == r.key() && versions_match(l.version(), r.version()),
        _ => false,
    }
}
