//! REST backend
//!
//! Talks to a token-authenticated JSON API exposing `/saveds` and `/records`.
//! Listings page with `os` (offset) and `lm` (limit) query parameters and
//! filter by version with `ts` (milliseconds).

use log::debug;
use serde::Deserialize;
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
use crate::error::SyncResult;
use crate::models::version::to_millis;
use crate::models::{CompositeKey, ProgressRecord, SavedEntry};

#[derive(Debug, Deserialize)]
struct HashResponse {
    hash: Option<String>,
}

/// One REST resource (`/saveds` or `/records`)
pub struct RestCollection<E> {
    http: Arc<HttpTransport>,
    pager: Pager,
    _entity: PhantomData<fn() -> E>,
}

impl<E: WireEntity> RestCollection<E> {
    pub fn new(http: Arc<HttpTransport>, page_size: usize) -> Self {
        Self {
            http,
            pager: Pager::new(page_size),
            _entity: PhantomData,
        }
    }

    /// Drain a listing, optionally filtered to versions after `since`
    fn fetch_rows(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<Value>> {
        self.pager.drain(|page| {
            let mut path = format!("/{}?os={}&lm={}", E::REST_PATH, page.offset, page.limit);
            if let Some(since) = since {
                path.push_str(&format!("&ts={}", to_millis(since)));
            }
            self.http.get_json::<Vec<Value>>(&path)
        })
    }
}

impl<E: WireEntity> RemoteCollection<E> for RestCollection<E> {
    fn fetch_latest(&self) -> SyncResult<Option<E>> {
        let rows: Vec<Value> = self.http.get_json(&format!("/{}?lm=1", E::REST_PATH))?;
        Ok(decode_rows::<E>(rows).into_iter().next())
    }

    fn fetch_all_keys(&self) -> SyncResult<BTreeSet<CompositeKey>> {
        let rows = self.fetch_rows(None)?;
        Ok(decode_keys(E::KIND, rows).into_iter().collect())
    }

    fn fetch_since(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<E>> {
        let rows = self.fetch_rows(since)?;
        debug!("Fetched {} {} rows from REST", rows.len(), E::KIND);
        Ok(decode_rows(rows))
    }

    fn push(&self, records: &[E]) -> SyncResult<()> {
        for chunk in records.chunks(self.pager.page_size()) {
            let body: Vec<E::Dto> = chunk.iter().map(WireEntity::to_dto).collect();
            self.http
                .send_json(Method::Put, &format!("/{}", E::REST_PATH), &body, &[])?;
        }
        Ok(())
    }

    fn delete(&self, keys: &[CompositeKey]) -> SyncResult<()> {
        for key in keys {
            self.http.delete(&format!(
                "/{}?mangaId={}&pluginId={}",
                E::REST_PATH,
                urlencoding::encode(&key.manga_id),
                urlencoding::encode(&key.plugin_id)
            ))?;
        }
        Ok(())
    }

    fn digest(&self) -> SyncResult<Option<String>> {
        let response: HashResponse = self.http.get_json(&format!("/{}/hash", E::REST_PATH))?;
        Ok(response.hash.filter(|h| !h.is_empty()))
    }
}

/// Backend for the bespoke REST API
pub struct RestBackend {
    id: String,
    saved: RestCollection<SavedEntry>,
    progress: RestCollection<ProgressRecord>,
}

impl RestBackend {
    /// Backend identifier used for cursors and selection
    pub const ID: &'static str = "rest";

    /// Default listing page size
    pub const DEFAULT_PAGE_SIZE: usize = 50;

    pub fn new(base_url: impl Into<String>, session: Arc<dyn Session>) -> Self {
        Self::with_page_size(base_url, session, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(
        base_url: impl Into<String>,
        session: Arc<dyn Session>,
        page_size: usize,
    ) -> Self {
        let http = Arc::new(HttpTransport::new(base_url, session));
        Self {
            id: Self::ID.to_string(),
            saved: RestCollection::new(http.clone(), page_size),
            progress: RestCollection::new(http, page_size),
        }
    }
}

impl Backend for RestBackend {
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
