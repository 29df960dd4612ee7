//! Dimension and duration probes.
//!
//! Raster dimensions come from header parsing (no full decode); vector
//! graphics get a dedicated probe instead of being rasterized just to
//! measure them. Audio/video probing is an external collaborator
//! behind the [`AvProbe`] trait: a missing field is always 0, never an
//! error.

use std::io::Cursor;
use std::path::Path;

use resvg::usvg;

use crate::error::MediaError;

/// Content sniff for vector graphics. Extension is ignored on purpose.
pub fn is_svg(data: &[u8]) -> bool {
    let head: &[u8] = &data[..data.len().min(1024)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && text.contains("<svg"))
}

/// Intrinsic size of a vector graphic, rounded up to whole pixels.
pub fn svg_dimensions(data: &[u8]) -> Result<(u32, u32), MediaError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| MediaError::Vector(e.to_string()))?;
    let size = tree.size();
    Ok((size.width().ceil() as u32, size.height().ceil() as u32))
}

/// Pixel dimensions of raster or vector image bytes.
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32), MediaError> {
    if is_svg(data) {
        return svg_dimensions(data);
    }

    let reader = image::ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Whether `data` is a recognized raster or vector image.
pub fn looks_like_image(data: &[u8]) -> bool {
    is_svg(data) || image::guess_format(data).is_ok()
}

/// What an audio/video probe reports about a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvMetadata {
    pub duration_ms: u64,
    /// Maximum width across all tracks (0 for audio).
    pub width: u32,
    /// Maximum height across all tracks (0 for audio).
    pub height: u32,
}

/// Audio/video metadata probing, provided by the embedding application.
pub trait AvProbe: Send + Sync {
    fn probe(&self, path: &Path) -> AvMetadata;
}

/// Probe that reports nothing; fields default to 0 per the best-effort
/// policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProbe;

impl AvProbe for NullProbe {
    fn probe(&self, _path: &Path) -> AvMetadata {
        AvMetadata::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVG: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="30"></svg>"#;

    #[test]
    fn sniffs_svg_by_content() {
        assert!(is_svg(SVG));
        assert!(is_svg(b"<?xml version=\"1.0\"?>\n<svg width=\"1\" height=\"1\"></svg>"));
        assert!(!is_svg(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn measures_svg_intrinsic_size() {
        assert_eq!(svg_dimensions(SVG).unwrap(), (40, 30));
    }

    #[test]
    fn measures_png_without_full_decode() {
        let png = crate::thumbnail::tests::encode_png_rgb(123, 45);
        assert_eq!(image_dimensions(&png).unwrap(), (123, 45));
    }

    #[test]
    fn null_probe_defaults_to_zero() {
        let meta = NullProbe.probe(Path::new("/nope.mp4"));
        assert_eq!(meta, AvMetadata::default());
    }
}
