//! Domain models for synced library entities

mod key;
mod progress;
mod saved;
mod sync_state;
pub mod version;

use chrono::{DateTime, Utc};
use std::fmt::Debug;

pub use key::CompositeKey;
pub use progress::ProgressRecord;
pub use saved::SavedEntry;
pub use sync_state::{EntityKind, SyncCursor};
pub use version::{VERSION_EPSILON, versions_match};

/// A keyed, versioned record that replicas exchange
pub trait Record: Debug + Clone + PartialEq + Send + Sync + 'static {
    const KIND: EntityKind;

    fn key(&self) -> &CompositeKey;

    /// Last-mutation time
    fn version(&self) -> DateTime<Utc>;
}

impl Record for SavedEntry {
    const KIND: EntityKind = EntityKind::Saved;

    fn key(&self) -> &CompositeKey {
        &self.key
    }

    fn version(&self) -> DateTime<Utc> {
        self.datetime
    }
}

impl Record for ProgressRecord {
    const KIND: EntityKind = EntityKind::Progress;

    fn key(&self) -> &CompositeKey {
        &self.key
    }

    fn version(&self) -> DateTime<Utc> {
        self.datetime
    }
}
