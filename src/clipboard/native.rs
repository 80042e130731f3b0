//! In-process clipboard access through arboard
//!
//! arboard works on raw RGBA pixels, so images are encoded to PNG on read
//! and decoded from their stored format on write.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};

use super::{check_size, ClipboardError, ClipboardImage, ClipboardSource};
use crate::history::image::parse_format;

/// arboard-backed clipboard
pub struct NativeClipboard {
    inner: Arc<Mutex<arboard::Clipboard>>,
}

impl NativeClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = arboard::Clipboard::new().map_err(map_error)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(clipboard)),
        })
    }

    /// Run `f` against the clipboard on the blocking pool.
    async fn with_clipboard<T, F>(&self, f: F) -> Result<T, ClipboardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut arboard::Clipboard) -> Result<T, ClipboardError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut clipboard = inner
                .lock()
                .map_err(|_| ClipboardError::Platform("clipboard lock poisoned".to_string()))?;
            f(&mut clipboard)
        })
        .await
        .map_err(|e| ClipboardError::Platform(format!("clipboard task failed: {}", e)))?
    }
}

#[async_trait]
impl ClipboardSource for NativeClipboard {
    async fn read_text(&self) -> Result<String, ClipboardError> {
        self.with_clipboard(|clipboard| clipboard.get_text().map_err(map_error))
            .await
    }

    async fn read_image(&self) -> Result<ClipboardImage, ClipboardError> {
        let image = self
            .with_clipboard(|clipboard| {
                let image = clipboard.get_image().map_err(map_error)?;
                Ok((image.width, image.height, image.bytes.into_owned()))
            })
            .await?;

        let (width, height, pixels) = image;
        let png = encode_png(width, height, pixels)?;
        check_size(png.len())?;
        Ok(ClipboardImage::new(png, "png"))
    }

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        check_size(text.len())?;
        let text = text.to_string();
        self.with_clipboard(move |clipboard| clipboard.set_text(text).map_err(map_error))
            .await
    }

    async fn write_image(&self, data: &[u8], format: &str) -> Result<(), ClipboardError> {
        check_size(data.len())?;

        let decoded = match parse_format(format) {
            Some(format) => image::load_from_memory_with_format(data, format),
            None => image::load_from_memory(data),
        }
        .map_err(|e| ClipboardError::UnsupportedType(format!("{} image: {}", format, e)))?;

        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba.into_raw();

        self.with_clipboard(move |clipboard| {
            clipboard
                .set_image(arboard::ImageData {
                    width: width as usize,
                    height: height as usize,
                    bytes: Cow::Owned(pixels),
                })
                .map_err(map_error)
        })
        .await
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

fn encode_png(width: usize, height: usize, pixels: Vec<u8>) -> Result<Vec<u8>, ClipboardError> {
    let buffer = RgbaImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
        ClipboardError::Platform(format!(
            "clipboard image buffer does not match {}x{}",
            width, height
        ))
    })?;

    let mut png = Cursor::new(Vec::new());
    buffer
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| ClipboardError::Platform(format!("failed to encode PNG: {}", e)))?;
    Ok(png.into_inner())
}

fn map_error(error: arboard::Error) -> ClipboardError {
    match error {
        arboard::Error::ContentNotAvailable => ClipboardError::NoContent,
        arboard::Error::ConversionFailure => ClipboardError::InvalidText,
        other => ClipboardError::Platform(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_png_round_trips_dimensions() {
        let pixels = vec![255u8; 4 * 3 * 2];
        let png = encode_png(3, 2, pixels).unwrap();
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn test_encode_png_rejects_short_buffer() {
        assert!(matches!(
            encode_png(10, 10, vec![0u8; 12]),
            Err(ClipboardError::Platform(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_error(arboard::Error::ContentNotAvailable),
            ClipboardError::NoContent
        ));
        assert!(matches!(
            map_error(arboard::Error::ClipboardNotSupported),
            ClipboardError::Platform(_)
        ));
    }
}
