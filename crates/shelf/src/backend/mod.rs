//! Remote backends
//!
//! A backend is a stateless transport to one remote copy of the user's
//! library. Each backend exposes one [`RemoteCollection`] per entity kind;
//! the sync coordinator only ever talks to that trait.

mod http;
mod managed;
mod memory;
pub mod pager;
mod rest;
mod session;
pub mod wire;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::models::{CompositeKey, ProgressRecord, SavedEntry};

pub use http::{HttpTransport, Method};
pub use managed::{ManagedBackend, ManagedCollection};
pub use memory::{CallCounts, InMemoryBackend, InMemoryCollection};
pub use pager::{PageRequest, Pager};
pub use rest::{RestBackend, RestCollection};
pub use session::{Session, StaticSession, StoredSession, StoredToken};

/// One remote collection of records of type `E`, scoped to the signed-in user
pub trait RemoteCollection<E>: Send + Sync {
    /// The remote record with the greatest version, or `None` when empty
    fn fetch_latest(&self) -> SyncResult<Option<E>>;

    /// Every remote key, drained across all pages
    fn fetch_all_keys(&self) -> SyncResult<BTreeSet<CompositeKey>>;

    /// Every remote record with a version strictly greater than `since`,
    /// or the whole collection when `since` is `None`
    fn fetch_since(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<E>>;

    /// Upsert records by key; the remote version becomes each record's
    /// `datetime`
    fn push(&self, records: &[E]) -> SyncResult<()>;

    /// Delete records by key; missing keys are ignored
    fn delete(&self, keys: &[CompositeKey]) -> SyncResult<()>;

    /// Fast equality token for the whole collection, if the transport has one
    fn digest(&self) -> SyncResult<Option<String>> {
        Ok(None)
    }
}

/// A remote store holding both entity kinds
pub trait Backend: Send + Sync {
    /// Stable identifier, used to key sync cursors
    fn id(&self) -> &str;

    fn saved(&self) -> &dyn RemoteCollection<SavedEntry>;

    fn progress(&self) -> &dyn RemoteCollection<ProgressRecord>;
}
