//! # clipstash
//!
//! Clipboard history manager for Linux desktops.
//!
//! A background poller samples the system clipboard and records text and
//! image captures into a deduplicated, size-bounded history backed by
//! SQLite. The CLI lists, restores, edits and deletes entries from that
//! history, and can browse it interactively.

pub mod cli;
pub mod clipboard;
pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod history;
pub mod poller;

pub use config::Config;
pub use history::{Entry, EntryKey, EntryPayload, HistoryStore, InsertOutcome};

/// Result type alias for clipstash operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for clipstash operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// History store error
    #[error("History error: {0}")]
    History(#[from] history::HistoryError),

    /// Legacy import error
    #[error("Migration error: {0}")]
    Migration(#[from] history::migrate::MigrationError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
