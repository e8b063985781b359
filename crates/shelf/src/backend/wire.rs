//! Wire representations shared by the HTTP backends
//!
//! Both transports use the same camelCase row shape. Versions travel as
//! integer milliseconds since the Unix epoch. Rows are decoded one at a time
//! so a single bad row is dropped without losing the rest of the page.

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::models::version::{from_millis, to_millis};
use crate::models::{CompositeKey, EntityKind, ProgressRecord, Record, SavedEntry};

/// Saved entry as sent and received over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDto {
    pub manga_id: String,
    pub plugin_id: String,
    pub datetime: i64,
    #[serde(default)]
    pub updates: bool,
    #[serde(default)]
    pub latest_chapter: String,
}

/// Progress record as sent and received over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDto {
    pub manga_id: String,
    pub plugin_id: String,
    pub datetime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_title: Option<String>,
    #[serde(default)]
    pub page: i32,
}

/// Key-only projection, used by key-set fetches
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDto {
    pub manga_id: String,
    pub plugin_id: String,
}

/// An entity with a typed wire form
pub trait WireEntity: Record {
    /// REST resource path segment
    const REST_PATH: &'static str;
    /// Managed database table
    const TABLE: &'static str;

    type Dto: Serialize + DeserializeOwned;

    fn to_dto(&self) -> Self::Dto;

    /// Validate and convert a decoded row
    fn from_dto(dto: Self::Dto) -> SyncResult<Self>;
}

fn validated_key(
    kind: EntityKind,
    manga_id: String,
    plugin_id: String,
) -> SyncResult<CompositeKey> {
    if manga_id.is_empty() {
        return Err(SyncError::malformed(kind, "empty mangaId"));
    }
    if plugin_id.is_empty() {
        return Err(SyncError::malformed(kind, "empty pluginId"));
    }
    Ok(CompositeKey::new(manga_id, plugin_id))
}

fn validated_version(kind: EntityKind, millis: i64) -> SyncResult<chrono::DateTime<chrono::Utc>> {
    from_millis(millis)
        .ok_or_else(|| SyncError::malformed(kind, format!("datetime out of range: {}", millis)))
}

impl WireEntity for SavedEntry {
    const REST_PATH: &'static str = "saveds";
    const TABLE: &'static str = "Saved";

    type Dto = SavedDto;

    fn to_dto(&self) -> SavedDto {
        SavedDto {
            manga_id: self.key.manga_id.clone(),
            plugin_id: self.key.plugin_id.clone(),
            datetime: to_millis(self.datetime),
            updates: self.has_unread_update,
            latest_chapter: self.latest_chapter_snapshot.clone(),
        }
    }

    fn from_dto(dto: SavedDto) -> SyncResult<Self> {
        let key = validated_key(Self::KIND, dto.manga_id, dto.plugin_id)?;
        let datetime = validated_version(Self::KIND, dto.datetime)?;
        Ok(SavedEntry {
            key,
            datetime,
            has_unread_update: dto.updates,
            latest_chapter_snapshot: dto.latest_chapter,
        })
    }
}

impl WireEntity for ProgressRecord {
    const REST_PATH: &'static str = "records";
    const TABLE: &'static str = "Record";

    type Dto = RecordDto;

    fn to_dto(&self) -> RecordDto {
        RecordDto {
            manga_id: self.key.manga_id.clone(),
            plugin_id: self.key.plugin_id.clone(),
            datetime: to_millis(self.datetime),
            chapter_id: self.chapter_id.clone(),
            chapter_title: self.chapter_title.clone(),
            page: self.page,
        }
    }

    fn from_dto(dto: RecordDto) -> SyncResult<Self> {
        let key = validated_key(Self::KIND, dto.manga_id, dto.plugin_id)?;
        let datetime = validated_version(Self::KIND, dto.datetime)?;
        Ok(ProgressRecord {
            key,
            datetime,
            chapter_id: dto.chapter_id,
            chapter_title: dto.chapter_title,
            page: dto.page,
        })
    }
}

/// Decode one raw row
pub fn decode_row<E: WireEntity>(row: Value) -> SyncResult<E> {
    let dto: E::Dto =
        serde_json::from_value(row).map_err(|e| SyncError::malformed(E::KIND, e.to_string()))?;
    E::from_dto(dto)
}

/// Decode a batch of raw rows, skipping (and logging) malformed ones
pub fn decode_rows<E: WireEntity>(rows: Vec<Value>) -> Vec<E> {
    rows.into_iter()
        .filter_map(|row| match decode_row::<E>(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping remote row: {}", e);
                None
            }
        })
        .collect()
}

/// Decode the key columns of a batch of raw rows, skipping malformed ones
pub fn decode_keys(kind: EntityKind, rows: Vec<Value>) -> Vec<CompositeKey> {
    rows.into_iter()
        .filter_map(|row| {
            let decoded = serde_json::from_value::<KeyDto>(row)
                .map_err(|e| SyncError::malformed(kind, e.to_string()))
                .and_then(|dto| validated_key(kind, dto.manga_id, dto.plugin_id));
            match decoded {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Skipping remote key: {}", e);
                    None
                }
            }
        })
        .collect()
}
