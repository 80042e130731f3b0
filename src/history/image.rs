//! Image payload inspection
//!
//! Decodes raw clipboard image bytes to validate them and extract the
//! metadata kept alongside each image entry.

use image::ImageFormat;

use super::{HistoryError, ImageInfo};

/// Formats tried, in order, when the declared format does not decode.
const FALLBACK_FORMATS: [ImageFormat; 2] = [ImageFormat::Png, ImageFormat::Jpeg];

/// Decode `data` and describe it.
///
/// The declared format is tried first, then PNG, then JPEG. The returned
/// `format` names whichever decoder succeeded, so a JPEG offered as
/// `image/png` is recorded as `jpeg`.
pub fn inspect(data: &[u8], declared_format: &str) -> Result<ImageInfo, HistoryError> {
    if data.is_empty() {
        return Err(HistoryError::InvalidImage("empty image data".to_string()));
    }

    let declared = parse_format(declared_format);
    let candidates = declared
        .into_iter()
        .chain(FALLBACK_FORMATS.into_iter().filter(|f| Some(*f) != declared));

    let mut last_error = None;
    for format in candidates {
        match image::load_from_memory_with_format(data, format) {
            Ok(decoded) => {
                return Ok(ImageInfo {
                    format: format_name(format).to_string(),
                    width: decoded.width(),
                    height: decoded.height(),
                    byte_size: data.len() as u64,
                });
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(HistoryError::InvalidImage(match last_error {
        Some(e) => e.to_string(),
        None => "no decoder available".to_string(),
    }))
}

/// Map a format name or MIME subtype (`png`, `jpg`, `image/jpeg`) to a decoder.
pub fn parse_format(name: &str) -> Option<ImageFormat> {
    let name = name.trim().to_ascii_lowercase();
    let name = name.strip_prefix("image/").unwrap_or(&name);
    ImageFormat::from_extension(name)
}

/// Canonical lowercase name recorded in [`ImageInfo::format`].
pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::WebP => "webp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Ico => "ico",
        _ => "unknown",
    }
}

/// MIME type used when handing an image back to the clipboard.
pub fn mime_type(format: &str) -> String {
    match parse_format(format) {
        Some(f) => format!("image/{}", format_name(f)),
        None => format!("image/{}", format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{RgbImage, RgbaImage};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .unwrap();
        out
    }

    #[test]
    fn test_inspect_png() {
        let data = encode_png(100, 100);
        let info = inspect(&data, "png").unwrap();
        assert_eq!(info.format, "png");
        assert_eq!((info.width, info.height), (100, 100));
        assert_eq!(info.byte_size, data.len() as u64);
    }

    #[test]
    fn test_inspect_corrects_wrong_declared_format() {
        let data = encode_jpeg(16, 8);
        let info = inspect(&data, "png").unwrap();
        assert_eq!(info.format, "jpeg");
        assert_eq!((info.width, info.height), (16, 8));
    }

    #[test]
    fn test_inspect_unknown_declared_format_falls_back() {
        let data = encode_png(4, 4);
        let info = inspect(&data, "x-bitmap-thing").unwrap();
        assert_eq!(info.format, "png");
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        assert!(matches!(
            inspect(b"definitely not an image", "png"),
            Err(HistoryError::InvalidImage(_))
        ));
        assert!(matches!(inspect(&[], "png"), Err(HistoryError::InvalidImage(_))));
    }

    #[test]
    fn test_parse_format_aliases() {
        assert_eq!(parse_format("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(parse_format("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(parse_format("PNG"), Some(ImageFormat::Png));
        assert_eq!(parse_format("nope"), None);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type("jpg"), "image/jpeg");
    }
}
