//! One-time import of legacy history files
//!
//! Older releases kept history as a JSON list of strings, then as a JSON
//! document of typed items, then in a `clipboard_history` SQLite table.
//! Each format has a parser; they are tried newest first and the first one
//! that accepts the file wins. Records are replayed through the normal
//! insert path, so deduplication and capacity apply exactly as they do for
//! live captures. The source file is renamed, never deleted.

use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{decode_payload, HistoryError, HistoryStore};

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// Errors raised while importing a legacy file
#[derive(Debug, Error)]
pub enum MigrationError {
    /// None of the known formats accepted the file
    #[error("Unrecognized history file {path:?}: {}", .attempts.join("; "))]
    UnknownFormat {
        path: PathBuf,
        attempts: Vec<String>,
    },

    /// The legacy path is the live database itself
    #[error("Refusing to import the active database {0:?} into itself")]
    SameAsDatabase(PathBuf),

    /// Writing imported records failed
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Legacy layouts, newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyFormat {
    /// SQLite `clipboard_history` table
    Relational,
    /// JSON array of `{type, content, timestamp, image_meta}` objects
    TypedDocument,
    /// JSON array of plain strings
    StringList,
}

impl fmt::Display for LegacyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LegacyFormat::Relational => "relational",
            LegacyFormat::TypedDocument => "typed-document",
            LegacyFormat::StringList => "string-list",
        };
        f.write_str(name)
    }
}

/// Summary of a completed import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub format: LegacyFormat,
    /// Records stored or moved by the import
    pub imported: usize,
    /// Records rejected as empty, duplicate of the newest entry, or invalid
    pub skipped: usize,
    /// Where the source file now lives
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LegacyRecord {
    Text(String),
    Image {
        encoded: String,
        format: Option<String>,
    },
}

type Parser = fn(&Path, &[u8]) -> Result<Vec<LegacyRecord>, String>;

const PARSERS: [(LegacyFormat, Parser); 3] = [
    (LegacyFormat::Relational, parse_relational),
    (LegacyFormat::TypedDocument, parse_typed_document),
    (LegacyFormat::StringList, parse_string_list),
];

#[derive(Deserialize)]
struct TypedItem {
    #[serde(rename = "type")]
    kind: String,
    content: String,
    #[serde(default)]
    image_meta: Option<TypedImageMeta>,
}

#[derive(Deserialize)]
struct TypedImageMeta {
    #[serde(default)]
    format: Option<String>,
}

fn parse_relational(path: &Path, bytes: &[u8]) -> Result<Vec<LegacyRecord>, String> {
    if !bytes.starts_with(SQLITE_HEADER) {
        return Err("not a SQLite database".to_string());
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| e.to_string())?;
    // Edits there refreshed the timestamp, so replay in timestamp order.
    let mut stmt = conn
        .prepare(
            "SELECT type, content, image_format FROM clipboard_history
             ORDER BY timestamp ASC, id ASC",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .map_err(|e| e.to_string())?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    Ok(rows
        .into_iter()
        .map(|(kind, content, format)| match kind.as_str() {
            "image" => LegacyRecord::Image {
                encoded: content,
                format,
            },
            _ => LegacyRecord::Text(content),
        })
        .collect())
}

fn parse_typed_document(_path: &Path, bytes: &[u8]) -> Result<Vec<LegacyRecord>, String> {
    let items: Vec<TypedItem> = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

    Ok(items
        .into_iter()
        .map(|item| match item.kind.as_str() {
            "image" => LegacyRecord::Image {
                encoded: item.content,
                format: item.image_meta.and_then(|meta| meta.format),
            },
            _ => LegacyRecord::Text(item.content),
        })
        .collect())
}

fn parse_string_list(_path: &Path, bytes: &[u8]) -> Result<Vec<LegacyRecord>, String> {
    let items: Vec<String> = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    Ok(items.into_iter().map(LegacyRecord::Text).collect())
}

/// Import `path` into `store` if it exists.
///
/// Returns `Ok(None)` when there is nothing to import. On success the file
/// has been renamed to a `.backup` sibling.
pub async fn import_legacy(
    store: &HistoryStore,
    path: &Path,
) -> Result<Option<ImportReport>, MigrationError> {
    if !path.exists() {
        return Ok(None);
    }
    if same_file(path, store.path()) {
        return Err(MigrationError::SameAsDatabase(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    let mut attempts = Vec::new();
    let mut parsed = None;

    for (format, parser) in PARSERS {
        match parser(path, &bytes) {
            Ok(records) => {
                parsed = Some((format, records));
                break;
            }
            Err(e) => attempts.push(format!("{}: {}", format, e)),
        }
    }

    let (format, records) = parsed.ok_or_else(|| MigrationError::UnknownFormat {
        path: path.to_path_buf(),
        attempts,
    })?;

    info!(
        "Importing {} legacy records from {:?} ({} format)",
        records.len(),
        path,
        format
    );

    let mut imported = 0;
    let mut skipped = 0;
    for record in records {
        let outcome = match record {
            LegacyRecord::Text(text) => store.insert_text(&text).await,
            LegacyRecord::Image { encoded, format } => match decode_payload(&encoded) {
                Ok(data) => {
                    store
                        .insert_image(&data, format.as_deref().unwrap_or(""))
                        .await
                }
                Err(e) => Err(HistoryError::InvalidImage(e.to_string())),
            },
        };

        match outcome {
            Ok(outcome) if outcome.is_stored() => imported += 1,
            Ok(_) => skipped += 1,
            Err(HistoryError::InvalidImage(reason)) => {
                warn!("Skipping legacy image record: {}", reason);
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let backup_path = backup_path_for(path);
    std::fs::rename(path, &backup_path)?;
    info!(
        "Imported {} records ({} skipped); legacy file moved to {:?}",
        imported, skipped, backup_path
    );

    Ok(Some(ImportReport {
        format,
        imported,
        skipped,
        backup_path,
    }))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    let candidate = path.with_file_name(&name);
    if !candidate.exists() {
        return candidate;
    }

    name.push(format!(".{}", chrono::Utc::now().timestamp()));
    path.with_file_name(name)
}
