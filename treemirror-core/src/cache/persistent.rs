//! On-disk content cache backed by SQLite, one row per item id

use crate::error::MirrorError;
use crate::item::Attributes;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const SCHEMA_VERSION: i32 = 1;

/// Persisted content plus validity metadata for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub content: String,
    /// Source modification time the content was fetched for
    #[serde(rename = "lastModified", with = "time::serde::rfc3339")]
    pub source_last_modified: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl CacheEntry {
    pub fn new(
        content: String,
        source_last_modified: OffsetDateTime,
        attributes: Option<Attributes>,
    ) -> Self {
        Self {
            content,
            source_last_modified,
            cached_at: OffsetDateTime::now_utc(),
            attributes,
        }
    }

    /// Valid iff the cached source timestamp is not older than the item's.
    /// `cached_at` plays no part: it only says when the cache wrote.
    pub fn is_valid_for(&self, last_modified: OffsetDateTime) -> bool {
        self.source_last_modified >= last_modified
    }
}

/// Cache size information
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub path: Option<PathBuf>,
}

/// SQLite-backed cache. Rows persist across sessions until invalidated or cleared.
pub struct PersistentCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl PersistentCache {
    /// Open or create the cache database at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory database, gone when dropped
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(MirrorError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS cache_entries (
                    id TEXT PRIMARY KEY,
                    content TEXT NOT NULL,
                    last_modified TEXT NOT NULL,
                    cached_at TEXT NOT NULL,
                    attributes TEXT
                );
                ",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> crate::Result<Option<CacheEntry>> {
        let row: Option<RawRow> = self
            .conn()
            .query_row(
                "SELECT content, last_modified, cached_at, attributes
                 FROM cache_entries WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(decode_row).transpose()
    }

    /// Insert or overwrite the entry for `id`
    pub fn put(&self, id: &str, entry: &CacheEntry) -> crate::Result<()> {
        let attributes = entry
            .attributes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn().execute(
            "INSERT INTO cache_entries (id, content, last_modified, cached_at, attributes)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                last_modified = excluded.last_modified,
                cached_at = excluded.cached_at,
                attributes = excluded.attributes",
            params![
                id,
                entry.content,
                format_timestamp(entry.source_last_modified)?,
                format_timestamp(entry.cached_at)?,
                attributes,
            ],
        )?;
        Ok(())
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, id: &str) -> crate::Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM cache_entries WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }

    /// Remove every entry, returning how many were deleted
    pub fn clear(&self) -> crate::Result<usize> {
        let removed = self.conn().execute("DELETE FROM cache_entries", [])?;
        Ok(removed)
    }

    /// Load every decodable entry in one scan. Undecodable rows are skipped.
    pub fn load_all(&self) -> crate::Result<HashMap<String, CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, content, last_modified, cached_at, attributes FROM cache_entries",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            Ok((id, (row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, raw) = row?;
            match decode_row(raw) {
                Ok(entry) => {
                    map.insert(id, entry);
                }
                Err(e) => tracing::warn!(id = %id, error = %e, "skipping unreadable cache row"),
            }
        }
        Ok(map)
    }

    pub fn stats(&self) -> crate::Result<CacheStats> {
        let entries: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        let size_bytes = self
            .path
            .as_ref()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(CacheStats {
            entries: entries as usize,
            size_bytes,
            path: self.path.clone(),
        })
    }
}

type RawRow = (String, String, String, Option<String>);

fn decode_row((content, last_modified, cached_at, attributes): RawRow) -> crate::Result<CacheEntry> {
    let attributes = attributes
        .as_deref()
        .map(serde_json::from_str::<Attributes>)
        .transpose()?;
    Ok(CacheEntry {
        content,
        source_last_modified: parse_timestamp(&last_modified)?,
        cached_at: parse_timestamp(&cached_at)?,
        attributes,
    })
}

fn format_timestamp(ts: OffsetDateTime) -> crate::Result<String> {
    ts.format(&Rfc3339).map_err(|e| MirrorError::Timestamp {
        value: ts.to_string(),
        message: e.to_string(),
    })
}

fn parse_timestamp(value: &str) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| MirrorError::Timestamp {
        value: value.to_string(),
        message: e.to_string(),
    })
}
