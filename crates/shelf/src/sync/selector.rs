//! Engine selector: the single active backend
//!
//! Switching backends never moves data between them. It wipes every sync
//! cursor so the next pass against the new backend is a full
//! reconciliation, and carries the newest successful sync time forward as
//! the offline horizon.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::{Arc, RwLock};

use super::events::{EventBus, SyncEvent};
use crate::backend::Backend;
use crate::models::{EntityKind, SyncCursor};
use crate::storage::LibraryStore;

/// Holds the active backend (or none)
pub struct EngineSelector {
    store: Arc<dyn LibraryStore>,
    active: RwLock<Option<Arc<dyn Backend>>>,
    events: Arc<EventBus>,
}

impl EngineSelector {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self::with_events(store, Arc::new(EventBus::new()))
    }

    pub fn with_events(store: Arc<dyn LibraryStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            active: RwLock::new(None),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The active backend, if any
    pub fn active(&self) -> Option<Arc<dyn Backend>> {
        self.active.read().unwrap().clone()
    }

    pub fn active_id(&self) -> Option<String> {
        self.active().map(|b| b.id().to_string())
    }

    /// Make `backend` the active backend (`None` signs out)
    ///
    /// Selecting a backend with the id already in effect only swaps the
    /// handle. Any other change resets cursors and emits
    /// [`SyncEvent::BackendChanged`].
    pub fn select(&self, backend: Option<Arc<dyn Backend>>) -> Result<()> {
        let previous = match self.active_id() {
            Some(id) => Some(id),
            None => self.store.get_selected_backend()?,
        };
        let current = backend.as_ref().map(|b| b.id().to_string());

        if previous == current {
            *self.active.write().unwrap() = backend;
            return Ok(());
        }

        let horizons = self.offline_horizons()?;
        self.store.clear_sync_cursors()?;

        // Pending cursors keep the horizon alive; with no backend selected
        // they stay parked under the previous id
        if let Some(owner) = current.as_ref().or(previous.as_ref()) {
            for (kind, horizon) in horizons {
                let cursor = SyncCursor::pending(owner.clone(), kind).with_horizon(horizon);
                self.store.save_sync_cursor(cursor)?;
            }
        }

        self.store.set_selected_backend(current.as_deref())?;
        *self.active.write().unwrap() = backend;

        info!(
            "Backend changed: {} -> {}",
            previous.as_deref().unwrap_or("none"),
            current.as_deref().unwrap_or("none")
        );
        self.events.emit(SyncEvent::BackendChanged { previous, current });
        Ok(())
    }

    /// Re-activate the persisted selection from `candidates` at startup
    ///
    /// Cursors are left untouched. Returns the id that was activated.
    pub fn restore(&self, candidates: Vec<Arc<dyn Backend>>) -> Result<Option<String>> {
        let Some(selected) = self.store.get_selected_backend()? else {
            return Ok(None);
        };

        match candidates.into_iter().find(|b| b.id() == selected) {
            Some(backend) => {
                *self.active.write().unwrap() = Some(backend);
                info!("Restored backend {}", selected);
                Ok(Some(selected))
            }
            None => {
                warn!("Selected backend {} is not available", selected);
                Ok(None)
            }
        }
    }

    /// Newest successful sync per kind across every stored cursor
    fn offline_horizons(&self) -> Result<Vec<(EntityKind, Option<DateTime<Utc>>)>> {
        let cursors = self.store.list_sync_cursors()?;
        Ok(EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let horizon = cursors
                    .iter()
                    .filter(|c| c.kind == kind)
                    .flat_map(|c| [c.last_sync_at, c.offline_horizon])
                    .flatten()
                    .max();
                (kind, horizon)
            })
            .collect())
    }
}
