//! Sync cursors for incremental reconciliation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two collections the engine keeps in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Saved,
    Progress,
}

impl EntityKind {
    /// Every kind, in sync order
    pub const ALL: [EntityKind; 2] = [EntityKind::Saved, EntityKind::Progress];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Saved => "saved",
            EntityKind::Progress => "progress",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saved" => Ok(EntityKind::Saved),
            "progress" => Ok(EntityKind::Progress),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Tracks sync progress for one entity kind against one backend
///
/// Persisted separately from entity data. Only one cursor per
/// (backend, kind) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Identifier of the backend this cursor belongs to
    pub backend_id: String,
    pub kind: EntityKind,
    /// When the last successful pass started; `None` until the first
    /// full reconciliation against this backend completes
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Newest successful sync for this kind with any backend, carried across
    /// backend switches. Local records newer than this were written offline.
    #[serde(default)]
    pub offline_horizon: Option<DateTime<Utc>>,
    /// Remote digest read before the last successful pass fetched anything
    #[serde(default)]
    pub remote_digest: Option<String>,
}

impl SyncCursor {
    /// A cursor that forces full reconciliation on the next pass
    pub fn pending(backend_id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            backend_id: backend_id.into(),
            kind,
            last_sync_at: None,
            offline_horizon: None,
            remote_digest: None,
        }
    }

    /// Carry an offline horizon into a pending cursor
    pub fn with_horizon(mut self, horizon: Option<DateTime<Utc>>) -> Self {
        self.offline_horizon = horizon;
        self
    }

    /// Whether the next pass must be a full reconciliation
    pub fn needs_full_reconciliation(&self) -> bool {
        self.last_sync_at.is_none()
    }

    /// Advance after a successful pass that started at `pass_started`
    pub fn advanced(mut self, pass_started: DateTime<Utc>, digest: Option<String>) -> Self {
        self.last_sync_at = Some(pass_started);
        self.offline_horizon = Some(pass_started);
        self.remote_digest = digest;
        self
    }
}
