//! Thumbnail derivation for outgoing images.
//!
//! The true format is classified by sniffing the bytes, never the file
//! extension. Sources that are already small, already PNG/JPEG and in
//! a universally-renderable color mode are not worth thumbnailing:
//! downloading the original is cheap enough, so [`ThumbnailError::NotNeeded`]
//! is returned instead. Everything else is downscaled to fit 800x600
//! and re-encoded; modes renderable without a background keep PNG,
//! the rest flattens to RGB JPEG. The slightly larger PNG thumbnails
//! buy guaranteed decodability everywhere.

use std::io::Cursor;

use image::{imageops::FilterType, ColorType, DynamicImage, ImageFormat};
use resvg::usvg;

use causerie_shared::constants::THUMBNAIL_MAX;

use crate::error::{MediaError, ThumbnailError};
use crate::probe::is_svg;

/// Metadata describing a derived thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailInfo {
    pub width: u32,
    pub height: u32,
    pub mime: String,
    /// Encoded byte size.
    pub size: u64,
}

/// Derive a thumbnail from raw image bytes (raster or vector).
///
/// Pure and deterministic: the same bytes always yield the same
/// output.
pub fn generate_thumbnail(data: &[u8]) -> Result<(Vec<u8>, ThumbnailInfo), ThumbnailError> {
    let vector = is_svg(data);

    let (img, format) = if vector {
        (rasterize_svg(data)?, ImageFormat::Png)
    } else {
        let reader = image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(MediaError::Io)?;
        let format = reader
            .format()
            .ok_or_else(|| MediaError::Vector("unrecognized image format".into()))?;
        (reader.decode()?, format)
    };

    let small = img.width() <= THUMBNAIL_MAX.0 && img.height() <= THUMBNAIL_MAX.1;
    let is_jpg_png = matches!(format, ImageFormat::Jpeg | ImageFormat::Png);
    // A PNG holding plain RGB data gains nothing from staying PNG.
    let jpgable_png = format == ImageFormat::Png && !png_renderable_mode(img.color());

    if small && is_jpg_png && !jpgable_png && !vector {
        return Err(ThumbnailError::NotNeeded);
    }

    let thumb = if small {
        img
    } else {
        img.resize(THUMBNAIL_MAX.0, THUMBNAIL_MAX.1, FilterType::Lanczos3)
    };

    let mut out = Vec::new();
    let mime = if png_renderable_mode(thumb.color()) {
        thumb
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(MediaError::Image)?;
        "image/png"
    } else {
        DynamicImage::ImageRgb8(thumb.to_rgb8())
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .map_err(MediaError::Image)?;
        "image/jpeg"
    };

    let info = ThumbnailInfo {
        width: thumb.width(),
        height: thumb.height(),
        mime: mime.to_owned(),
        size: out.len() as u64,
    };
    Ok((out, info))
}

/// Color modes that render correctly without compositing a background:
/// grayscale and anything carrying an alpha channel.
fn png_renderable_mode(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8
            | ColorType::L16
            | ColorType::La8
            | ColorType::La16
            | ColorType::Rgba8
            | ColorType::Rgba16
            | ColorType::Rgba32F
    )
}

/// Rasterize a vector graphic at its intrinsic size.
fn rasterize_svg(data: &[u8]) -> Result<DynamicImage, MediaError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| MediaError::Vector(e.to_string()))?;
    let size = tree.size();
    let (w, h) = (size.width().ceil() as u32, size.height().ceil() as u32);

    let mut pixmap = resvg::tiny_skia::Pixmap::new(w.max(1), h.max(1))
        .ok_or_else(|| MediaError::Vector("zero-sized vector graphic".into()))?;
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::identity(),
        &mut pixmap.as_mut(),
    );

    let png = pixmap
        .encode_png()
        .map_err(|e| MediaError::Vector(e.to_string()))?;
    Ok(image::load_from_memory_with_format(&png, ImageFormat::Png)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    pub fn encode_png_rgb(w: u32, h: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn encode_png_rgba(w: u32, h: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(w, h, |x, _| {
            Rgba([(x % 256) as u8, 10, 20, 200])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn encode_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(w, h, |_, _| Rgb([90, 90, 90]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn small_jpeg_is_not_thumbnailed() {
        let err = generate_thumbnail(&encode_jpeg(500, 400)).unwrap_err();
        assert!(matches!(err, ThumbnailError::NotNeeded));
    }

    #[test]
    fn small_alpha_png_is_not_thumbnailed() {
        let err = generate_thumbnail(&encode_png_rgba(100, 100)).unwrap_err();
        assert!(matches!(err, ThumbnailError::NotNeeded));
    }

    #[test]
    fn small_rgb_png_reencodes_to_jpeg() {
        // Plain RGB data in a PNG container: worth flattening to JPEG.
        let (_, info) = generate_thumbnail(&encode_png_rgb(100, 100)).unwrap();
        assert_eq!(info.mime, "image/jpeg");
        assert_eq!((info.width, info.height), (100, 100));
    }

    #[test]
    fn large_alpha_png_downscales_and_keeps_alpha() {
        let (bytes, info) = generate_thumbnail(&encode_png_rgba(2000, 1500)).unwrap();
        assert_eq!(info.mime, "image/png");
        assert!(info.width <= 800 && info.height <= 600);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn large_jpeg_downscales_preserving_aspect() {
        let (_, info) = generate_thumbnail(&encode_jpeg(1600, 1200)).unwrap();
        assert!(info.width <= 800 && info.height <= 600);
        // 4:3 stays 4:3
        assert_eq!(info.width * 3, info.height * 4);
    }

    #[test]
    fn svg_always_produces_a_thumbnail() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="48"><rect width="64" height="48" fill="red"/></svg>"#;
        let (_, info) = generate_thumbnail(svg).unwrap();
        assert_eq!((info.width, info.height), (64, 48));
        assert_eq!(info.mime, "image/png");
    }

    #[test]
    fn derivation_is_deterministic() {
        let input = encode_png_rgba(1200, 900);
        let (a, _) = generate_thumbnail(&input).unwrap();
        let (b, _) = generate_thumbnail(&input).unwrap();
        assert_eq!(a, b);
    }
}
