//! Managed database backend
//!
//! Talks to a Postgrest-style API at `{url}/rest/v1/<Table>`. Every row is
//! scoped by a `userId` column; the id comes from the session. Reads page
//! with `offset`/`limit`, key-set reads select only the key columns, and
//! upserts merge on `(userId, mangaId, pluginId)`.

use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::http::{HttpTransport, Method};
use super::pager::Pager;
use super::session::Session;
use super::wire::{WireEntity, decode_keys, decode_rows};
use super::{Backend, RemoteCollection};
use crate::error::{SyncError, SyncResult};
use crate::models::version::to_millis;
use crate::models::{CompositeKey, ProgressRecord, SavedEntry};

/// Largest page the server will return
pub const MAX_PAGE_SIZE: usize = 1000;

/// A wire row tagged with its owner
#[derive(Serialize)]
struct OwnedRow<'a, D> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(flatten)]
    row: D,
}

/// One table (`Saved` or `Record`)
pub struct ManagedCollection<E> {
    http: Arc<HttpTransport>,
    pager: Pager,
    _entity: PhantomData<fn() -> E>,
}

impl<E: WireEntity> ManagedCollection<E> {
    pub fn new(http: Arc<HttpTransport>, page_size: usize) -> Self {
        Self {
            http,
            pager: Pager::new(page_size.min(MAX_PAGE_SIZE)),
            _entity: PhantomData,
        }
    }

    fn user_id(&self) -> SyncResult<String> {
        self.http
            .session()
            .user_id()
            .ok_or(SyncError::BackendNotConfigured)
    }

    fn table_path(&self, query: &str) -> String {
        format!("/rest/v1/{}?{}", E::TABLE, query)
    }

    fn owner_filter(user_id: &str) -> String {
        format!("userId=eq.{}", urlencoding::encode(user_id))
    }

    fn key_filter(user_id: &str, key: &CompositeKey) -> String {
        format!(
            "{}&mangaId=eq.{}&pluginId=eq.{}",
            Self::owner_filter(user_id),
            urlencoding::encode(&key.manga_id),
            urlencoding::encode(&key.plugin_id)
        )
    }

    /// Drain `select` columns across pages in a stable order
    fn fetch_rows(&self, select: &str, filter: &str, order: &str) -> SyncResult<Vec<Value>> {
        self.pager.drain(|page| {
            let query = format!(
                "select={}&{}&order={}&offset={}&limit={}",
                select, filter, order, page.offset, page.limit
            );
            self.http.get_json::<Vec<Value>>(&self.table_path(&query))
        })
    }
}

impl<E: WireEntity> RemoteCollection<E> for ManagedCollection<E> {
    fn fetch_latest(&self) -> SyncResult<Option<E>> {
        let user_id = self.user_id()?;
        let query = format!(
            "select=*&{}&order=datetime.desc&limit=1",
            Self::owner_filter(&user_id)
        );
        let rows: Vec<Value> = self.http.get_json(&self.table_path(&query))?;
        Ok(decode_rows::<E>(rows).into_iter().next())
    }

    fn fetch_all_keys(&self) -> SyncResult<BTreeSet<CompositeKey>> {
        let user_id = self.user_id()?;
        let rows = self.fetch_rows(
            "mangaId,pluginId",
            &Self::owner_filter(&user_id),
            "pluginId.asc,mangaId.asc",
        )?;
        Ok(decode_keys(E::KIND, rows).into_iter().collect())
    }

    fn fetch_since(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<E>> {
        let user_id = self.user_id()?;
        let mut filter = Self::owner_filter(&user_id);
        if let Some(since) = since {
            filter.push_str(&format!("&datetime=gt.{}", to_millis(since)));
        }
        let rows = self.fetch_rows("*", &filter, "datetime.desc,pluginId.asc,mangaId.asc")?;
        debug!("Fetched {} {} rows from {}", rows.len(), E::KIND, E::TABLE);
        Ok(decode_rows(rows))
    }

    fn push(&self, records: &[E]) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let user_id = self.user_id()?;
        let path = self.table_path("on_conflict=userId,mangaId,pluginId");

        for chunk in records.chunks(self.pager.page_size()) {
            let body: Vec<OwnedRow<'_, E::Dto>> = chunk
                .iter()
                .map(|record| OwnedRow {
                    user_id: &user_id,
                    row: record.to_dto(),
                })
                .collect();
            self.http.send_json(
                Method::Post,
                &path,
                &body,
                &[("Prefer", "resolution=merge-duplicates,return=minimal")],
            )?;
        }
        Ok(())
    }

    fn delete(&self, keys: &[CompositeKey]) -> SyncResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let user_id = self.user_id()?;
        for key in keys {
            self.http
                .delete(&self.table_path(&Self::key_filter(&user_id, key)))?;
        }
        Ok(())
    }
}

/// Backend for the managed database service
pub struct ManagedBackend {
    id: String,
    saved: ManagedCollection<SavedEntry>,
    progress: ManagedCollection<ProgressRecord>,
}

impl ManagedBackend {
    /// Backend identifier used for cursors and selection
    pub const ID: &'static str = "managed";

    pub fn new(url: impl Into<String>, api_key: &str, session: Arc<dyn Session>) -> Self {
        Self::with_page_size(url, api_key, session, MAX_PAGE_SIZE)
    }

    pub fn with_page_size(
        url: impl Into<String>,
        api_key: &str,
        session: Arc<dyn Session>,
        page_size: usize,
    ) -> Self {
        let http = Arc::new(HttpTransport::new(url, session).with_header("apikey", api_key));
        Self {
            id: Self::ID.to_string(),
            saved: ManagedCollection::new(http.clone(), page_size),
            progress: ManagedCollection::new(http, page_size),
        }
    }
}

impl Backend for ManagedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn saved(&self) -> &dyn RemoteCollection<SavedEntry> {
        &self.saved
    }

    fn progress(&self) -> &dyn RemoteCollection<ProgressRecord> {
        &self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticSession;
    use crate::backend::wire::SavedDto;

    fn collection(page_size: usize) -> ManagedCollection<SavedEntry> {
        let session = Arc::new(StaticSession::new("tok").with_user_id("u 1"));
        ManagedCollection::new(Arc::new(HttpTransport::new("http://db", session)), page_size)
    }

    #[test]
    fn test_page_size_is_capped() {
        assert_eq!(collection(5000).pager.page_size(), MAX_PAGE_SIZE);
        assert_eq!(collection(200).pager.page_size(), 200);
    }

    #[test]
    fn test_key_filter_is_encoded() {
        let filter = ManagedCollection::<SavedEntry>::key_filter(
            "u 1",
            &CompositeKey::new("a&b", "p/1"),
        );
        assert_eq!(filter, "userId=eq.u%201&mangaId=eq.a%26b&pluginId=eq.p%2F1");
    }

    #[test]
    fn test_owned_row_flattens_dto() {
        let row = OwnedRow {
            user_id: "u1",
            row: SavedDto {
                manga_id: "m1".to_string(),
                plugin_id: "p1".to_string(),
                datetime: 10,
                updates: false,
                latest_chapter: String::new(),
            },
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["mangaId"], "m1");
        assert_eq!(value["datetime"], 10);
    }

    #[test]
    fn test_requires_user_id() {
        let session = Arc::new(StaticSession::new("tok"));
        let collection: ManagedCollection<SavedEntry> =
            ManagedCollection::new(Arc::new(HttpTransport::new("http://db", session)), 10);
        assert_eq!(collection.fetch_latest(), Err(SyncError::BackendNotConfigured));
    }
}
