//! Saved entry model: a bookmarked title in the user's library

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CompositeKey;
use super::version::now_millis;

/// A title the user has saved to their library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedEntry {
    pub key: CompositeKey,
    /// Last mutation time; the authoritative version for conflict resolution
    pub datetime: DateTime<Utc>,
    /// Whether the source has chapters the user hasn't seen yet
    pub has_unread_update: bool,
    /// Opaque encoded reference to the newest chapter seen at last refresh
    pub latest_chapter_snapshot: String,
}

impl SavedEntry {
    /// Create an entry stamped with the current time
    pub fn new(key: impl Into<CompositeKey>) -> Self {
        Self {
            key: key.into(),
            datetime: now_millis(),
            has_unread_update: false,
            latest_chapter_snapshot: String::new(),
        }
    }

    pub fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = datetime;
        self
    }

    pub fn with_unread_update(mut self, has_unread_update: bool) -> Self {
        self.has_unread_update = has_unread_update;
        self
    }

    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.latest_chapter_snapshot = snapshot.into();
        self
    }

    /// Record a mutation: bump the version to now
    pub fn touch(&mut self) {
        self.datetime = now_millis();
    }
}
