//! Unread-update refresh
//!
//! Asks each content source for the newest chapter of every saved title and
//! flags titles whose newest chapter changed. Flagged entries get a new
//! version, so the next sync carries the flag to other devices. A failing
//! source is logged and skipped; it never blocks the others.

use anyhow::Result;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{CompositeKey, SavedEntry};
use crate::storage::LibraryStore;

/// A content plugin able to report the newest chapter of a title
pub trait ChapterSource: Send + Sync {
    fn plugin_id(&self) -> &str;

    /// Opaque reference to the newest chapter, `None` if the title has none
    fn latest_chapter(&self, manga_id: &str) -> Result<Option<String>>;
}

/// Outcome of one refresh pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateReport {
    /// Titles checked against a source
    pub checked: usize,
    /// Titles newly flagged as having an unread update
    pub flagged: usize,
    /// Plugins with saved titles but no registered source
    pub missing_sources: Vec<String>,
    /// Plugins whose source failed, with the error
    pub failed: Vec<(String, String)>,
}

/// What happened for one plugin
struct PluginResult {
    checked: usize,
    changed: Vec<SavedEntry>,
    flagged: usize,
    error: Option<String>,
}

fn refresh_plugin(source: &dyn ChapterSource, entries: Vec<SavedEntry>) -> PluginResult {
    let mut result = PluginResult {
        checked: 0,
        changed: Vec::new(),
        flagged: 0,
        error: None,
    };

    for mut entry in entries {
        match source.latest_chapter(&entry.key.manga_id) {
            Ok(Some(latest)) if latest != entry.latest_chapter_snapshot => {
                // The first snapshot only establishes a baseline
                if !entry.latest_chapter_snapshot.is_empty() && !entry.has_unread_update {
                    entry.has_unread_update = true;
                    result.flagged += 1;
                }
                entry.latest_chapter_snapshot = latest;
                entry.touch();
                result.changed.push(entry);
            }
            Ok(_) => {}
            Err(e) => {
                result.error = Some(format!("{:#}", e));
                break;
            }
        }
        result.checked += 1;
    }
    result
}

/// Check every saved title against its plugin's source
pub fn refresh_updates(
    store: &dyn LibraryStore,
    sources: &[Arc<dyn ChapterSource>],
) -> Result<UpdateReport> {
    let mut by_plugin: BTreeMap<String, Vec<SavedEntry>> = BTreeMap::new();
    for entry in store.list_saved()? {
        by_plugin.entry(entry.key.plugin_id.clone()).or_default().push(entry);
    }

    let mut report = UpdateReport::default();
    let mut work = Vec::new();
    for (plugin_id, entries) in by_plugin {
        match sources.iter().find(|s| s.plugin_id() == plugin_id) {
            Some(source) => work.push((plugin_id, source.clone(), entries)),
            None => {
                debug!("No source registered for plugin {}", plugin_id);
                report.missing_sources.push(plugin_id);
            }
        }
    }

    let results: Vec<(String, PluginResult)> = work
        .into_par_iter()
        .map(|(plugin_id, source, entries)| {
            let result = refresh_plugin(source.as_ref(), entries);
            (plugin_id, result)
        })
        .collect();

    let mut changed = Vec::new();
    for (plugin_id, result) in results {
        report.checked += result.checked;
        report.flagged += result.flagged;
        changed.extend(result.changed);
        if let Some(error) = result.error {
            warn!("Update check for plugin {} failed: {}", plugin_id, error);
            report.failed.push((plugin_id, error));
        }
    }

    if !changed.is_empty() {
        store.upsert_saved_batch(changed)?;
    }
    Ok(report)
}

/// Clear the unread flag for a title; returns false if it isn't saved
pub fn mark_seen(store: &dyn LibraryStore, key: &CompositeKey) -> Result<bool> {
    let Some(mut entry) = store.get_saved(key)? else {
        return Ok(false);
    };
    if entry.has_unread_update {
        entry.has_unread_update = false;
        entry.touch();
        store.upsert_saved_batch(vec![entry])?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::version::from_millis;
    use crate::storage::InMemoryLibraryStore;
    use std::collections::HashMap;

    struct FakeSource {
        plugin_id: String,
        chapters: HashMap<String, String>,
        fail: bool,
    }

    impl FakeSource {
        fn new(plugin_id: &str, chapters: &[(&str, &str)]) -> Self {
            Self {
                plugin_id: plugin_id.to_string(),
                chapters: chapters
                    .iter()
                    .map(|(m, c)| (m.to_string(), c.to_string()))
                    .collect(),
                fail: false,
            }
        }

        fn failing(plugin_id: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(plugin_id, &[])
            }
        }
    }

    impl ChapterSource for FakeSource {
        fn plugin_id(&self) -> &str {
            &self.plugin_id
        }

        fn latest_chapter(&self, manga_id: &str) -> Result<Option<String>> {
            if self.fail {
                anyhow::bail!("source offline");
            }
            Ok(self.chapters.get(manga_id).cloned())
        }
    }

    fn entry(manga: &str, plugin: &str, snapshot: &str) -> SavedEntry {
        SavedEntry::new((manga, plugin))
            .with_datetime(from_millis(100).unwrap())
            .with_snapshot(snapshot)
    }

    #[test]
    fn test_flags_changed_titles() {
        let store = InMemoryLibraryStore::new();
        store
            .upsert_saved_batch(vec![
                entry("m1", "p1", "c1"),
                entry("m2", "p1", "c5"),
                entry("m3", "p1", ""),
            ])
            .unwrap();

        let sources: Vec<Arc<dyn ChapterSource>> = vec![Arc::new(FakeSource::new(
            "p1",
            &[("m1", "c2"), ("m2", "c5"), ("m3", "c9")],
        ))];
        let report = refresh_updates(&store, &sources).unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.flagged, 1);

        let m1 = store.get_saved(&CompositeKey::new("m1", "p1")).unwrap().unwrap();
        assert!(m1.has_unread_update);
        assert_eq!(m1.latest_chapter_snapshot, "c2");
        assert!(m1.datetime.timestamp_millis() > 100);

        let m2 = store.get_saved(&CompositeKey::new("m2", "p1")).unwrap().unwrap();
        assert!(!m2.has_unread_update);
        assert_eq!(m2.datetime.timestamp_millis(), 100);

        // Baseline snapshot without a flag
        let m3 = store.get_saved(&CompositeKey::new("m3", "p1")).unwrap().unwrap();
        assert!(!m3.has_unread_update);
        assert_eq!(m3.latest_chapter_snapshot, "c9");
    }

    #[test]
    fn test_failing_source_does_not_block_others() {
        let store = InMemoryLibraryStore::new();
        store
            .upsert_saved_batch(vec![
                entry("m1", "broken", "c1"),
                entry("m2", "good", "c1"),
                entry("m3", "unknown", "c1"),
            ])
            .unwrap();

        let sources: Vec<Arc<dyn ChapterSource>> = vec![
            Arc::new(FakeSource::failing("broken")),
            Arc::new(FakeSource::new("good", &[("m2", "c2")])),
        ];
        let report = refresh_updates(&store, &sources).unwrap();

        assert_eq!(report.flagged, 1);
        assert_eq!(report.missing_sources, vec!["unknown".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert!(report.failed[0].1.contains("source offline"));
    }

    #[test]
    fn test_mark_seen() {
        let store = InMemoryLibraryStore::new();
        let key = CompositeKey::new("m1", "p1");
        store
            .upsert_saved_batch(vec![entry("m1", "p1", "c1").with_unread_update(true)])
            .unwrap();

        assert!(mark_seen(&store, &key).unwrap());
        let seen = store.get_saved(&key).unwrap().unwrap();
        assert!(!seen.has_unread_update);
        assert!(seen.datetime.timestamp_millis() > 100);

        assert!(!mark_seen(&store, &CompositeKey::new("missing", "p1")).unwrap());
    }
}
