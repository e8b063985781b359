//! Progress record model: the furthest-read position for a title

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CompositeKey;
use super::version::now_millis;

/// Reading checkpoint for one title
///
/// There is one record per title, never a history: writing a new position
/// replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub key: CompositeKey,
    /// Last mutation time; the authoritative version for conflict resolution
    pub datetime: DateTime<Utc>,
    pub chapter_id: Option<String>,
    pub chapter_title: Option<String>,
    /// Page within the chapter
    pub page: i32,
}

impl ProgressRecord {
    /// Create a record at page 0 of no particular chapter, stamped now
    pub fn new(key: impl Into<CompositeKey>) -> Self {
        Self {
            key: key.into(),
            datetime: now_millis(),
            chapter_id: None,
            chapter_title: None,
            page: 0,
        }
    }

    pub fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = datetime;
        self
    }

    pub fn with_chapter(mut self, chapter_id: impl Into<String>, title: Option<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self.chapter_title = title;
        self
    }

    pub fn with_page(mut self, page: i32) -> Self {
        self.page = page;
        self
    }
}
