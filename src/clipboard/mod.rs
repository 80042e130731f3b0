//! Clipboard abstraction layer
//!
//! The history engine only needs four operations from the system clipboard:
//! read and write text, read and write an encoded image. [`ClipboardSource`]
//! captures that surface; backends live in the submodules.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub mod command;
pub mod memory;
pub mod native;

/// Largest clipboard payload accepted from or handed to a backend (32MB)
pub const MAX_CLIPBOARD_SIZE: usize = 32 * 1024 * 1024;

/// Encoded image read from the clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardImage {
    /// Encoded bytes (PNG, JPEG, ...)
    pub data: Vec<u8>,
    /// Format reported by the backend (`png`, `jpeg`, ...)
    pub format: String,
}

impl ClipboardImage {
    pub fn new(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            data,
            format: format.into(),
        }
    }
}

/// System clipboard access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipboardSource: Send + Sync {
    /// Current clipboard text
    async fn read_text(&self) -> Result<String, ClipboardError>;

    /// Current clipboard image, if the selection offers one
    async fn read_image(&self) -> Result<ClipboardImage, ClipboardError>;

    /// Replace the clipboard with `text`
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError>;

    /// Replace the clipboard with an encoded image
    async fn write_image(&self, data: &[u8], format: &str) -> Result<(), ClipboardError>;

    /// Backend name for logs and `status`
    fn name(&self) -> &'static str;
}

/// Which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardBackend {
    /// External tools when available, otherwise native
    #[default]
    Auto,
    /// In-process clipboard access through arboard
    Native,
    /// xclip or wl-clipboard subprocesses
    Command,
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// No content of the requested kind
    #[error("No clipboard content available")]
    NoContent,

    /// Selection is not valid UTF-8 text
    #[error("Clipboard text is not valid UTF-8")]
    InvalidText,

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// Unsupported content type
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    /// No usable clipboard tool on PATH
    #[error("No clipboard tool found (install xclip or wl-clipboard)")]
    ToolNotFound,

    /// A clipboard tool did not answer in time
    #[error("Clipboard command timed out after {0:?}")]
    Timeout(Duration),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClipboardError {
    /// Whether the error means the clipboard itself misbehaved, as opposed
    /// to simply holding nothing usable.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ClipboardError::NoContent | ClipboardError::InvalidText
        )
    }
}

pub(crate) fn check_size(size: usize) -> Result<(), ClipboardError> {
    if size > MAX_CLIPBOARD_SIZE {
        return Err(ClipboardError::TooLarge {
            size,
            max: MAX_CLIPBOARD_SIZE,
        });
    }
    Ok(())
}

/// Create a clipboard source for the current platform
pub fn create_source(
    backend: ClipboardBackend,
) -> Result<Arc<dyn ClipboardSource>, ClipboardError> {
    let source: Arc<dyn ClipboardSource> = match backend {
        ClipboardBackend::Native => Arc::new(native::NativeClipboard::new()?),
        ClipboardBackend::Command => Arc::new(command::CommandClipboard::detect()?),
        ClipboardBackend::Auto => match command::CommandClipboard::detect() {
            Ok(source) => Arc::new(source),
            Err(_) => Arc::new(native::NativeClipboard::new()?),
        },
    };

    info!("Using {} clipboard backend", source.name());
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(!ClipboardError::NoContent.is_failure());
        assert!(!ClipboardError::InvalidText.is_failure());
        assert!(ClipboardError::Platform("x".to_string()).is_failure());
        assert!(ClipboardError::Timeout(Duration::from_secs(1)).is_failure());
    }

    #[test]
    fn test_check_size() {
        assert!(check_size(1024).is_ok());
        assert!(matches!(
            check_size(MAX_CLIPBOARD_SIZE + 1),
            Err(ClipboardError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_backend_from_config_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: ClipboardBackend,
        }
        let parsed: Wrapper = toml::from_str("backend = \"command\"").unwrap();
        assert_eq!(parsed.backend, ClipboardBackend::Command);
        assert_eq!(ClipboardBackend::default(), ClipboardBackend::Auto);
    }
}
