//! SQLite persistence for clipboard history
//!
//! Rows are ordered by their autoincrement `id`, which is the insertion
//! order. Editing an entry rewrites it in place and keeps its `id`; a
//! duplicate capture deletes the old row and inserts a fresh one, which
//! moves it to the end.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::{Entry, EntryKey, EntryKind, EntryPayload, HistoryError, ImageInfo, ImagePayload};

const SCHEMA_VERSION: u32 = 1;

const SELECT_COLUMNS: &str = "SELECT id, kind, payload, captured_at,
        image_format, image_width, image_height, image_byte_size
     FROM entries";

/// A row about to be written.
pub(crate) struct NewRow<'a> {
    pub kind: EntryKind,
    pub payload: &'a str,
    pub captured_at: DateTime<Utc>,
    pub image: Option<&'a ImageInfo>,
}

/// Open (or create) the history database at `path`.
pub(crate) fn open(path: &Path) -> Result<Connection, HistoryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;

    // WAL lets the daemon and one-off CLI commands share the file.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;

    initialize(&conn)?;
    Ok(conn)
}

fn initialize(conn: &Connection) -> Result<(), HistoryError> {
    let version = schema_version(conn)?;

    if version == 0 {
        create_schema(conn)?;
    } else if version > SCHEMA_VERSION {
        return Err(HistoryError::Schema(format!(
            "database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32, HistoryError> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn create_schema(conn: &Connection) -> Result<(), HistoryError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK(kind IN ('text', 'image')),
            payload TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            image_format TEXT,
            image_width INTEGER,
            image_height INTEGER,
            image_byte_size INTEGER,
            UNIQUE(kind, payload)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_captured_at ON entries(captured_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entries_kind ON entries(kind);
        ",
    )?;

    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Load every entry, oldest first.
pub(crate) fn load_all(conn: &Connection) -> Result<Vec<Entry>, HistoryError> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))?;
    let rows = stmt
        .query_map([], |row| Ok(row_to_entry(row)))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().collect()
}

pub(crate) fn count(conn: &Connection) -> Result<usize, HistoryError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Payload and timestamp of the newest row.
pub(crate) fn latest(
    tx: &Transaction<'_>,
) -> Result<Option<(EntryKind, String, i64)>, HistoryError> {
    let row = tx
        .query_row(
            "SELECT kind, payload, captured_at FROM entries ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((kind, payload, captured_at)) => {
            Ok(Some((EntryKind::parse(&kind)?, payload, captured_at)))
        }
        None => Ok(None),
    }
}

/// Delete rows with the given identity. Returns the number removed.
pub(crate) fn delete_key(tx: &Transaction<'_>, key: &EntryKey) -> Result<usize, HistoryError> {
    Ok(tx.execute(
        "DELETE FROM entries WHERE kind = ? AND payload = ?",
        params![key.kind.as_str(), key.payload],
    )?)
}

pub(crate) fn insert(tx: &Transaction<'_>, row: &NewRow<'_>) -> Result<i64, HistoryError> {
    let (format, width, height, size) = match row.image {
        Some(info) => (
            Some(info.format.as_str()),
            Some(i64::from(info.width)),
            Some(i64::from(info.height)),
            Some(info.byte_size as i64),
        ),
        None => (None, None, None, None),
    };

    tx.execute(
        "INSERT INTO entries
         (kind, payload, captured_at, image_format, image_width, image_height, image_byte_size)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            row.kind.as_str(),
            row.payload,
            row.captured_at.timestamp_millis(),
            format,
            width,
            height,
            size,
        ],
    )?;

    Ok(tx.last_insert_rowid())
}

/// Drop the oldest rows until at most `capacity` remain.
pub(crate) fn evict_oldest(tx: &Transaction<'_>, capacity: usize) -> Result<usize, HistoryError> {
    let count: i64 = tx.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
    let excess = count - capacity as i64;
    if excess <= 0 {
        return Ok(0);
    }

    Ok(tx.execute(
        "DELETE FROM entries WHERE id IN (
            SELECT id FROM entries ORDER BY id ASC LIMIT ?
        )",
        params![excess],
    )?)
}

/// Row id at `index` in insertion order.
pub(crate) fn id_at(tx: &Transaction<'_>, index: usize) -> Result<Option<i64>, HistoryError> {
    Ok(tx
        .query_row(
            "SELECT id FROM entries ORDER BY id ASC LIMIT 1 OFFSET ?",
            params![index as i64],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn delete_id(tx: &Transaction<'_>, id: i64) -> Result<usize, HistoryError> {
    Ok(tx.execute("DELETE FROM entries WHERE id = ?", params![id])?)
}

/// Rewrite the payload of the text row matching `original`.
pub(crate) fn update_text(
    tx: &Transaction<'_>,
    original: &str,
    replacement: &str,
    captured_at: DateTime<Utc>,
) -> Result<usize, HistoryError> {
    Ok(tx.execute(
        "UPDATE entries SET payload = ?, captured_at = ? WHERE kind = 'text' AND payload = ?",
        params![replacement, captured_at.timestamp_millis(), original],
    )?)
}

pub(crate) fn clear(tx: &Transaction<'_>) -> Result<usize, HistoryError> {
    Ok(tx.execute("DELETE FROM entries", [])?)
}

fn row_to_entry(row: &Row<'_>) -> Result<Entry, HistoryError> {
    let id: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let captured_at: i64 = row.get(3)?;
    let image_format: Option<String> = row.get(4)?;
    let image_width: Option<i64> = row.get(5)?;
    let image_height: Option<i64> = row.get(6)?;
    let image_byte_size: Option<i64> = row.get(7)?;

    let captured_at = DateTime::from_timestamp_millis(captured_at)
        .ok_or_else(|| HistoryError::Schema(format!("invalid timestamp on entry {}", id)))?;

    let payload = match EntryKind::parse(&kind)? {
        EntryKind::Text => EntryPayload::Text(payload),
        EntryKind::Image => {
            let data = super::decode_payload(&payload).map_err(|e| {
                HistoryError::Schema(format!("entry {} has a corrupt image payload: {}", id, e))
            })?;
            let info = ImageInfo {
                format: image_format.unwrap_or_else(|| "png".to_string()),
                width: image_width.unwrap_or(0) as u32,
                height: image_height.unwrap_or(0) as u32,
                byte_size: image_byte_size.unwrap_or(data.len() as i64) as u64,
            };
            EntryPayload::Image(ImagePayload { data, info })
        }
    };

    Ok(Entry {
        id,
        captured_at,
        payload,
    })
}
