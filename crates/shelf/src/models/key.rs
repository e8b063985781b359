//! Composite identifiers shared by every synced entity

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifies a title within a content plugin: `(manga_id, plugin_id)`.
///
/// Ordering is by plugin first, then manga, so maps keyed by
/// `CompositeKey` iterate deterministically and group titles by source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub manga_id: String,
    pub plugin_id: String,
}

impl CompositeKey {
    pub fn new(manga_id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            manga_id: manga_id.into(),
            plugin_id: plugin_id.into(),
        }
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.plugin_id
            .cmp(&other.plugin_id)
            .then_with(|| self.manga_id.cmp(&other.manga_id))
    }
}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_id, self.manga_id)
    }
}

impl<M: Into<String>, P: Into<String>> From<(M, P)> for CompositeKey {
    fn from((manga_id, plugin_id): (M, P)) -> Self {
        Self::new(manga_id, plugin_id)
    }
}
