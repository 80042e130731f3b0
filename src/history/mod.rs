//! Clipboard history management and persistence
//!
//! [`HistoryStore`] is the single source of truth for captured entries. It
//! keeps an in-memory copy of the history behind a reader/writer lock and
//! a SQLite connection behind a mutex. Every mutation takes the view lock
//! exclusively, commits one transaction, reloads the view from the
//! database and only then releases the lock, so readers never observe a
//! state that was not durably written.

pub(crate) mod database;
pub mod image;
pub mod migrate;

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Default number of entries kept in history.
pub const MAX_HISTORY: usize = 50;

/// Errors reported by the history store
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The database has not been opened or was closed
    #[error("History storage is unavailable")]
    StorageUnavailable,

    /// Image bytes were empty or could not be decoded
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Replacement text was empty after trimming
    #[error("Text is empty after trimming")]
    EmptyText,

    /// Display index outside the current history
    #[error("Invalid index {index} (history has {len} entries)")]
    InvalidIndex { index: usize, len: usize },

    /// No entry with the given identity
    #[error("No matching history entry")]
    NotFound,

    /// Only text entries can be edited
    #[error("Only text entries can be edited")]
    NotEditable,

    /// Stored data does not match the expected layout
    #[error("Schema error: {0}")]
    Schema(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What kind of content an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Text,
    Image,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Text => "text",
            EntryKind::Image => "image",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self, HistoryError> {
        match s {
            "text" => Ok(EntryKind::Text),
            "image" => Ok(EntryKind::Image),
            other => Err(HistoryError::Schema(format!("unknown entry kind '{}'", other))),
        }
    }
}

/// Metadata recorded for image entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Decoder that accepted the bytes (`png`, `jpeg`, ...)
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Size of the encoded image in bytes
    pub byte_size: u64,
}

/// Raw encoded image plus its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub info: ImageInfo,
}

/// Content of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum EntryPayload {
    Text(String),
    Image(ImagePayload),
}

/// One captured clipboard item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Database row id
    pub id: i64,
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self.payload {
            EntryPayload::Text(_) => EntryKind::Text,
            EntryPayload::Image(_) => EntryKind::Image,
        }
    }

    /// Identity of this entry within the store.
    pub fn key(&self) -> EntryKey {
        match &self.payload {
            EntryPayload::Text(text) => EntryKey::text(text.clone()),
            EntryPayload::Image(image) => EntryKey {
                kind: EntryKind::Image,
                payload: encode_payload(&image.data),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            EntryPayload::Text(text) => Some(text),
            EntryPayload::Image(_) => None,
        }
    }

    pub fn image_info(&self) -> Option<&ImageInfo> {
        match &self.payload {
            EntryPayload::Text(_) => None,
            EntryPayload::Image(image) => Some(&image.info),
        }
    }

    /// One-line summary with a type tag, as printed by `list`.
    pub fn preview(&self, max_chars: usize) -> String {
        match &self.payload {
            EntryPayload::Text(text) => {
                let flat = text.replace(['\n', '\r'], " ");
                let truncated: String = flat.chars().take(max_chars).collect();
                if flat.chars().count() > max_chars {
                    format!("[TEXT] {}...", truncated)
                } else {
                    format!("[TEXT] {}", truncated)
                }
            }
            EntryPayload::Image(image) => format!(
                "[IMAGE] {} {}x{} ({} KB)",
                image.info.format.to_uppercase(),
                image.info.width,
                image.info.height,
                image.info.byte_size / 1024
            ),
        }
    }
}

/// Identity of an entry: its kind plus the stored payload
///
/// For images the payload is the base64 transport form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub kind: EntryKind,
    pub payload: String,
}

impl EntryKey {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Text,
            payload: text.into(),
        }
    }
}

/// Why an insert left the history untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing left after trimming
    Empty,
    /// Identical to the most recent entry
    SameAsLatest,
}

/// Result of a successful insert call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New content appended
    Inserted,
    /// Content already present elsewhere, moved to the newest position
    Moved,
    /// Nothing changed
    Skipped(SkipReason),
}

impl InsertOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, InsertOutcome::Skipped(_))
    }
}

/// Callback run after [`HistoryStore::clear`] commits
pub type ClearHook = Box<dyn FnOnce() + Send>;

pub(crate) fn encode_payload(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub(crate) fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(payload)
}

/// Durable, deduplicated, size-bounded clipboard history
pub struct HistoryStore {
    entries: RwLock<Vec<Entry>>,
    conn: Mutex<Option<Connection>>,
    capacity: usize,
    path: PathBuf,
}

impl HistoryStore {
    /// Open the history database at `path`, creating it if needed.
    pub async fn open(path: &Path, capacity: usize) -> Result<Self, HistoryError> {
        let capacity = capacity.max(1);
        let mut conn = database::open(path)?;

        // A smaller capacity than the previous run trims on open.
        let tx = conn.transaction()?;
        let evicted = database::evict_oldest(&tx, capacity)?;
        tx.commit()?;
        if evicted > 0 {
            info!("Evicted {} entries to fit capacity {}", evicted, capacity);
        }

        let entries = database::load_all(&conn)?;
        info!(
            "Opened clipboard history at {:?} ({} entries)",
            path,
            entries.len()
        );

        Ok(Self {
            entries: RwLock::new(entries),
            conn: Mutex::new(Some(conn)),
            capacity,
            path: path.to_path_buf(),
        })
    }

    /// Close the database. Later operations report
    /// [`HistoryError::StorageUnavailable`].
    pub async fn close(&self) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().await;
        let mut conn = self.conn.lock().await;

        if let Some(conn) = conn.take() {
            conn.close().map_err(|(_, e)| HistoryError::Database(e))?;
            info!("Closed clipboard history at {:?}", self.path);
        }
        entries.clear();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Store a text capture.
    ///
    /// Whitespace is trimmed. Empty text and text equal to the newest entry
    /// are skipped without error. An identical entry anywhere in the
    /// history is moved to the end instead of duplicated.
    pub async fn insert_text(&self, text: &str) -> Result<InsertOutcome, HistoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(InsertOutcome::Skipped(SkipReason::Empty));
        }

        let key = EntryKey::text(text);
        self.insert_row(&key, None).await
    }

    /// Store an image capture.
    ///
    /// The bytes must decode as an image; see [`image::inspect`] for the
    /// format fallback order.
    pub async fn insert_image(
        &self,
        data: &[u8],
        declared_format: &str,
    ) -> Result<InsertOutcome, HistoryError> {
        let info = image::inspect(data, declared_format)?;
        let key = EntryKey {
            kind: EntryKind::Image,
            payload: encode_payload(data),
        };
        self.insert_row(&key, Some(&info)).await
    }

    async fn insert_row(
        &self,
        key: &EntryKey,
        image: Option<&ImageInfo>,
    ) -> Result<InsertOutcome, HistoryError> {
        let mut entries = self.entries.write().await;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(HistoryError::StorageUnavailable)?;

        let tx = conn.transaction()?;

        let mut captured_at = Utc::now();
        if let Some((kind, payload, last_at)) = database::latest(&tx)? {
            if kind == key.kind && payload == key.payload {
                return Ok(InsertOutcome::Skipped(SkipReason::SameAsLatest));
            }
            // Keep capture times non-decreasing even if the clock steps back.
            if let Some(last_at) = DateTime::from_timestamp_millis(last_at) {
                captured_at = captured_at.max(last_at);
            }
        }

        let moved = database::delete_key(&tx, key)? > 0;
        database::insert(
            &tx,
            &database::NewRow {
                kind: key.kind,
                payload: &key.payload,
                captured_at,
                image,
            },
        )?;
        let evicted = database::evict_oldest(&tx, self.capacity)?;
        tx.commit()?;

        *entries = database::load_all(conn)?;

        debug!(
            "Stored {} entry (moved: {}, evicted: {}, total: {})",
            key.kind.as_str(),
            moved,
            evicted,
            entries.len()
        );

        Ok(if moved {
            InsertOutcome::Moved
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Remove the entry at `index` (0 = oldest).
    pub async fn remove_at(&self, index: usize) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().await;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(HistoryError::StorageUnavailable)?;

        let tx = conn.transaction()?;
        let id = match database::id_at(&tx, index)? {
            Some(id) => id,
            None => {
                let len = database::count(&tx)?;
                return Err(HistoryError::InvalidIndex { index, len });
            }
        };
        database::delete_id(&tx, id)?;
        tx.commit()?;

        *entries = database::load_all(conn)?;
        debug!("Removed history entry at index {}", index);
        Ok(())
    }

    /// Remove the entry with the given identity.
    pub async fn remove(&self, key: &EntryKey) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().await;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(HistoryError::StorageUnavailable)?;

        let tx = conn.transaction()?;
        if database::delete_key(&tx, key)? == 0 {
            return Err(HistoryError::NotFound);
        }
        tx.commit()?;

        *entries = database::load_all(conn)?;
        Ok(())
    }

    /// Replace the text of the entry identified by `key`.
    ///
    /// The entry keeps its position; only its content and timestamp change.
    /// If another text entry already holds the new content, that other
    /// entry is dropped so identities stay unique.
    pub async fn edit(&self, key: &EntryKey, new_text: &str) -> Result<(), HistoryError> {
        if key.kind != EntryKind::Text {
            return Err(HistoryError::NotEditable);
        }
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(HistoryError::EmptyText);
        }

        let mut entries = self.entries.write().await;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(HistoryError::StorageUnavailable)?;

        let tx = conn.transaction()?;
        if new_text != key.payload {
            database::delete_key(&tx, &EntryKey::text(new_text))?;
        }
        if database::update_text(&tx, &key.payload, new_text, Utc::now())? == 0 {
            return Err(HistoryError::NotFound);
        }
        tx.commit()?;

        *entries = database::load_all(conn)?;
        debug!("Edited text entry");
        Ok(())
    }

    /// Remove every entry, then run `hooks` in order.
    ///
    /// Hooks run after the locks are released, so they may call back into
    /// the store.
    pub async fn clear(&self, hooks: Vec<ClearHook>) -> Result<(), HistoryError> {
        {
            let mut entries = self.entries.write().await;
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or(HistoryError::StorageUnavailable)?;

            let tx = conn.transaction()?;
            let removed = database::clear(&tx)?;
            tx.commit()?;

            *entries = database::load_all(conn)?;
            info!("Cleared clipboard history ({} entries removed)", removed);
        }

        for hook in hooks {
            hook();
        }
        Ok(())
    }

    /// Re-read the history from the database, picking up writes made by
    /// other processes.
    pub async fn reload(&self) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().await;
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(HistoryError::StorageUnavailable)?;
        *entries = database::load_all(conn)?;
        Ok(())
    }

    pub async fn len(&self) -> Result<usize, HistoryError> {
        self.ensure_open().await?;
        Ok(self.entries.read().await.len())
    }

    pub async fn is_empty(&self) -> Result<bool, HistoryError> {
        Ok(self.len().await? == 0)
    }

    /// Copy of the history, oldest first.
    pub async fn snapshot(&self) -> Result<Vec<Entry>, HistoryError> {
        self.ensure_open().await?;
        Ok(self.entries.read().await.clone())
    }

    /// Copy of the newest entry.
    pub async fn latest(&self) -> Result<Option<Entry>, HistoryError> {
        self.ensure_open().await?;
        Ok(self.entries.read().await.last().cloned())
    }

    async fn ensure_open(&self) -> Result<(), HistoryError> {
        if self.conn.lock().await.is_some() {
            Ok(())
        } else {
            Err(HistoryError::StorageUnavailable)
        }
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}
