//! SQLite-based library storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::LibraryStore;
use crate::models::version::{from_millis, to_millis};
use crate::models::{CompositeKey, EntityKind, ProgressRecord, SavedEntry, SyncCursor};

/// Settings key holding the selected backend id
const SELECTED_BACKEND_KEY: &str = "selected_backend";

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Bookmarked titles; datetime is milliseconds since epoch
            CREATE TABLE saved_entries (
                manga_id TEXT NOT NULL,
                plugin_id TEXT NOT NULL,
                datetime INTEGER NOT NULL,
                has_unread_update INTEGER NOT NULL DEFAULT 0,
                latest_chapter TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (plugin_id, manga_id)
            );

            CREATE INDEX idx_saved_entries_datetime ON saved_entries(datetime DESC);

            -- Furthest-read position per title
            CREATE TABLE progress_records (
                manga_id TEXT NOT NULL,
                plugin_id TEXT NOT NULL,
                datetime INTEGER NOT NULL,
                chapter_id TEXT,
                chapter_title TEXT,
                page INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (plugin_id, manga_id)
            );

            CREATE INDEX idx_progress_records_datetime ON progress_records(datetime DESC);

            -- Sync cursor per backend and entity kind
            CREATE TABLE sync_cursors (
                backend_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                last_sync_at INTEGER,
                PRIMARY KEY (backend_id, kind)
            );
            "#,
        ),
        // Migration 2: Offline horizon, digests, and settings
        M::up(
            r#"
            ALTER TABLE sync_cursors ADD COLUMN offline_horizon INTEGER;
            ALTER TABLE sync_cursors ADD COLUMN remote_digest TEXT;

            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        ),
    ])
}

/// Decode a stored millisecond timestamp
fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    from_millis(ms).unwrap_or_default()
}

fn saved_from_row(row: &Row<'_>) -> rusqlite::Result<SavedEntry> {
    Ok(SavedEntry {
        key: CompositeKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        datetime: millis_to_datetime(row.get(2)?),
        has_unread_update: row.get(3)?,
        latest_chapter_snapshot: row.get(4)?,
    })
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressRecord> {
    Ok(ProgressRecord {
        key: CompositeKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        datetime: millis_to_datetime(row.get(2)?),
        chapter_id: row.get(3)?,
        chapter_title: row.get(4)?,
        page: row.get(5)?,
    })
}

const SAVED_COLUMNS: &str = "manga_id, plugin_id, datetime, has_unread_update, latest_chapter";
const PROGRESS_COLUMNS: &str = "manga_id, plugin_id, datetime, chapter_id, chapter_title, page";

/// SQLite-based library storage
///
/// Batch upserts run inside a single transaction, so a failed batch leaves
/// the previous contents untouched.
pub struct SqliteLibraryStore {
    conn: Mutex<Connection>,
}

impl SqliteLibraryStore {
    /// Open (or create) a library database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL keeps readers unblocked while a sync pass writes
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_saved(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<SavedEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, saved_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn query_progress(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ProgressRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, progress_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn list_saved(&self) -> Result<Vec<SavedEntry>> {
        self.query_saved(
            &format!("SELECT {SAVED_COLUMNS} FROM saved_entries ORDER BY plugin_id, manga_id"),
            [],
        )
    }

    fn list_saved_since(&self, since: DateTime<Utc>) -> Result<Vec<SavedEntry>> {
        self.query_saved(
            &format!(
                "SELECT {SAVED_COLUMNS} FROM saved_entries WHERE datetime > ?
                 ORDER BY plugin_id, manga_id"
            ),
            [to_millis(since)],
        )
    }

    fn latest_saved(&self) -> Result<Option<SavedEntry>> {
        let mut latest = self.query_saved(
            &format!(
                "SELECT {SAVED_COLUMNS} FROM saved_entries
                 ORDER BY datetime DESC, plugin_id DESC, manga_id DESC LIMIT 1"
            ),
            [],
        )?;
        Ok(latest.pop())
    }

    fn get_saved(&self, key: &CompositeKey) -> Result<Option<SavedEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {SAVED_COLUMNS} FROM saved_entries WHERE manga_id = ? AND plugin_id = ?"
                ),
                params![key.manga_id, key.plugin_id],
                saved_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn upsert_saved_batch(&self, entries: Vec<SavedEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO saved_entries
                 (manga_id, plugin_id, datetime, has_unread_update, latest_chapter)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(plugin_id, manga_id) DO UPDATE SET
                    datetime = excluded.datetime,
                    has_unread_update = excluded.has_unread_update,
                    latest_chapter = excluded.latest_chapter",
            )?;

            for entry in &entries {
                stmt.execute(params![
                    entry.key.manga_id,
                    entry.key.plugin_id,
                    to_millis(entry.datetime),
                    entry.has_unread_update,
                    entry.latest_chapter_snapshot,
                ])?;
            }
        }
        tx.commit().context("Failed to commit saved entries")?;
        Ok(())
    }

    fn delete_saved(&self, key: &CompositeKey) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM saved_entries WHERE manga_id = ? AND plugin_id = ?",
            params![key.manga_id, key.plugin_id],
        )?;
        Ok(())
    }

    fn list_progress(&self) -> Result<Vec<ProgressRecord>> {
        self.query_progress(
            &format!(
                "SELECT {PROGRESS_COLUMNS} FROM progress_records ORDER BY plugin_id, manga_id"
            ),
            [],
        )
    }

    fn list_progress_since(&self, since: DateTime<Utc>) -> Result<Vec<ProgressRecord>> {
        self.query_progress(
            &format!(
                "SELECT {PROGRESS_COLUMNS} FROM progress_records WHERE datetime > ?
                 ORDER BY plugin_id, manga_id"
            ),
            [to_millis(since)],
        )
    }

    fn latest_progress(&self) -> Result<Option<ProgressRecord>> {
        let mut latest = self.query_progress(
            &format!(
                "SELECT {PROGRESS_COLUMNS} FROM progress_records
                 ORDER BY datetime DESC, plugin_id DESC, manga_id DESC LIMIT 1"
            ),
            [],
        )?;
        Ok(latest.pop())
    }

    fn get_progress(&self, key: &CompositeKey) -> Result<Option<ProgressRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM progress_records
                     WHERE manga_id = ? AND plugin_id = ?"
                ),
                params![key.manga_id, key.plugin_id],
                progress_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert_progress_batch(&self, records: Vec<ProgressRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO progress_records
                 (manga_id, plugin_id, datetime, chapter_id, chapter_title, page)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(plugin_id, manga_id) DO UPDATE SET
                    datetime = excluded.datetime,
                    chapter_id = excluded.chapter_id,
                    chapter_title = excluded.chapter_title,
                    page = excluded.page",
            )?;

            for record in &records {
                stmt.execute(params![
                    record.key.manga_id,
                    record.key.plugin_id,
                    to_millis(record.datetime),
                    record.chapter_id,
                    record.chapter_title,
                    record.page,
                ])?;
            }
        }
        tx.commit().context("Failed to commit progress records")?;
        Ok(())
    }

    fn delete_progress(&self, key: &CompositeKey) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM progress_records WHERE manga_id = ? AND plugin_id = ?",
            params![key.manga_id, key.plugin_id],
        )?;
        Ok(())
    }

    fn get_sync_cursor(&self, backend_id: &str, kind: EntityKind) -> Result<Option<SyncCursor>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(Option<i64>, Option<i64>, Option<String>)> = conn
            .query_row(
                "SELECT last_sync_at, offline_horizon, remote_digest
                 FROM sync_cursors WHERE backend_id = ? AND kind = ?",
                params![backend_id, kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((last_sync_at, offline_horizon, remote_digest)) = row else {
            return Ok(None);
        };

        Ok(Some(SyncCursor {
            backend_id: backend_id.to_string(),
            kind,
            last_sync_at: last_sync_at.map(millis_to_datetime),
            offline_horizon: offline_horizon.map(millis_to_datetime),
            remote_digest,
        }))
    }

    fn save_sync_cursor(&self, cursor: SyncCursor) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR REPLACE INTO sync_cursors
             (backend_id, kind, last_sync_at, offline_horizon, remote_digest)
             VALUES (?, ?, ?, ?, ?)",
            params![
                cursor.backend_id,
                cursor.kind.as_str(),
                cursor.last_sync_at.map(to_millis),
                cursor.offline_horizon.map(to_millis),
                cursor.remote_digest,
            ],
        )?;

        Ok(())
    }

    fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT backend_id, kind, last_sync_at, offline_horizon, remote_digest
             FROM sync_cursors ORDER BY backend_id, kind",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut cursors = Vec::with_capacity(rows.len());
        for (backend_id, kind, last_sync_at, offline_horizon, remote_digest) in rows {
            let Ok(kind) = kind.parse::<EntityKind>() else {
                log::warn!("[STORE] Ignoring cursor with unknown kind {:?}", kind);
                continue;
            };
            cursors.push(SyncCursor {
                backend_id,
                kind,
                last_sync_at: last_sync_at.map(millis_to_datetime),
                offline_horizon: offline_horizon.map(millis_to_datetime),
                remote_digest,
            });
        }
        Ok(cursors)
    }

    fn clear_sync_cursors(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sync_cursors", [])?;
        Ok(())
    }

    fn get_selected_backend(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                [SELECTED_BACKEND_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_selected_backend(&self, backend_id: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match backend_id {
            Some(id) => conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                params![SELECTED_BACKEND_KEY, id],
            )?,
            None => conn.execute(
                "DELETE FROM settings WHERE key = ?",
                [SELECTED_BACKEND_KEY],
            )?,
        };
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "DELETE FROM saved_entries;
             DELETE FROM progress_records;
             DELETE FROM sync_cursors;
             DELETE FROM settings;",
        )?;

        Ok(())
    }
}
