//! Sync engine: conflict resolution, the reconciliation protocol and
//! backend selection
//!
//! Every pass is idempotent and can be safely retried.

mod accessors;
mod coordinator;
mod events;
mod resolver;
mod selector;
mod timing;

pub use accessors::SyncEntity;
pub use coordinator::{
    EntitySyncStats, SyncCoordinator, SyncMode, SyncOptions, SyncOutcome, SyncReport,
};
pub use events::{EventBus, EventLog, SyncEvent, SyncObserver};
pub use resolver::{Decision, Side, resolve};
pub use selector::EngineSelector;
pub use timing::{cooldown_elapsed, cooldown_remaining};
