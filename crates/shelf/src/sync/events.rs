//! Sync notifications
//!
//! Observers register a callback and receive every event the selector and
//! coordinator emit. Transports never emit events.

use std::sync::{Arc, RwLock};

use super::coordinator::EntitySyncStats;
use crate::models::EntityKind;

/// Something observers may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The active backend changed; the next pass reconciles fully
    BackendChanged {
        previous: Option<String>,
        current: Option<String>,
    },
    /// A pass for one kind began
    SyncStarted { backend: String, kind: EntityKind },
    /// A pass for one kind finished and its cursor advanced
    SyncCompleted {
        backend: String,
        kind: EntityKind,
        stats: EntitySyncStats,
    },
    /// A pass for one kind failed; its cursor was left where it was
    SyncFailed {
        backend: String,
        kind: EntityKind,
        message: String,
    },
}

/// Callback interface for sync events
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Fans events out to every registered observer
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn SyncObserver>) {
        if let Ok(mut guard) = self.observers.write() {
            guard.push(observer);
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        let observers = match self.observers.read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        for observer in observers {
            observer.on_event(&event);
        }
    }
}

/// Observer that records every event, for tests and status displays
#[derive(Default)]
pub struct EventLog {
    events: RwLock<Vec<SyncEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }
}

impl SyncObserver for EventLog {
    fn on_event(&self, event: &SyncEvent) {
        if let Ok(mut guard) = self.events.write() {
            guard.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_observer() {
        let bus = EventBus::new();
        let first = Arc::new(EventLog::new());
        let second = Arc::new(EventLog::new());
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        bus.emit(SyncEvent::BackendChanged {
            previous: None,
            current: Some("rest".to_string()),
        });

        assert_eq!(first.events().len(), 1);
        assert_eq!(first.events(), second.events());
    }

    #[test]
    fn test_emit_without_observers() {
        EventBus::new().emit(SyncEvent::SyncStarted {
            backend: "rest".to_string(),
            kind: EntityKind::Saved,
        });
    }
}
