//! Scriptable in-memory clipboard for tests
//!
//! A test double, not a selectable backend: `create_source` never returns
//! it. It drives the poller and CLI without a display. Contents and read
//! failures are set directly, and reads and writes are counted.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{check_size, ClipboardError, ClipboardImage, ClipboardSource};

#[derive(Debug, Default)]
struct State {
    text: Option<String>,
    image: Option<ClipboardImage>,
    failing_reads: usize,
    text_reads: usize,
    image_reads: usize,
    writes: usize,
}

/// Clipboard held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    state: Mutex<State>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the clipboard with text, dropping any image.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut state = self.state();
        state.text = Some(text.into());
        state.image = None;
    }

    /// Replace the clipboard with an image, dropping any text.
    pub fn set_image(&self, data: Vec<u8>, format: impl Into<String>) {
        let mut state = self.state();
        state.image = Some(ClipboardImage::new(data, format));
        state.text = None;
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.text = None;
        state.image = None;
    }

    /// Make the next `count` text reads fail with a platform error.
    pub fn fail_next_reads(&self, count: usize) {
        self.state().failing_reads = count;
    }

    pub fn text(&self) -> Option<String> {
        self.state().text.clone()
    }

    pub fn image(&self) -> Option<ClipboardImage> {
        self.state().image.clone()
    }

    pub fn text_reads(&self) -> usize {
        self.state().text_reads
    }

    pub fn image_reads(&self) -> usize {
        self.state().image_reads
    }

    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

#[async_trait]
impl ClipboardSource for MemoryClipboard {
    async fn read_text(&self) -> Result<String, ClipboardError> {
        let mut state = self.state();
        state.text_reads += 1;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ClipboardError::Platform("simulated read failure".to_string()));
        }
        state.text.clone().ok_or(ClipboardError::NoContent)
    }

    async fn read_image(&self) -> Result<ClipboardImage, ClipboardError> {
        let mut state = self.state();
        state.image_reads += 1;
        state.image.clone().ok_or(ClipboardError::NoContent)
    }

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        check_size(text.len())?;
        let mut state = self.state();
        state.writes += 1;
        state.text = Some(text.to_string());
        state.image = None;
        Ok(())
    }

    async fn write_image(&self, data: &[u8], format: &str) -> Result<(), ClipboardError> {
        check_size(data.len())?;
        let mut state = self.state();
        state.writes += 1;
        state.image = Some(ClipboardImage::new(data.to_vec(), format));
        state.text = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
