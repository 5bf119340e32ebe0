//! Image decoding and re-encoding helpers.
//!
//! Uploads are decoded once with their EXIF orientation applied and then
//! re-encoded for whichever consumer needs them: PNG for the embedding model,
//! small JPEG thumbnails for the vision service.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};

/// Landscape images wider than this ratio are rotated before type detection.
const DETECTION_ROTATE_RATIO: f32 = 1.5;

/// Check if data looks like an image, by magic bytes
pub fn is_image(data: &[u8]) -> bool {
    infer::is_image(data)
}

/// Decode an image, applying its EXIF orientation.
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to read image")?
        .into_decoder()
        .context("Unsupported image format")?;

    let orientation = decoder.orientation().context("Failed to read orientation")?;
    let mut img = DynamicImage::from_decoder(decoder).context("Failed to decode image")?;
    img.apply_orientation(orientation);

    Ok(img)
}

/// Rotate wide landscape shots a quarter turn.
///
/// Product photos of rings and necklaces are mostly portrait or square; a
/// strongly landscape frame usually means the camera was held sideways.
pub fn rotate_for_detection(img: &DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w as f32 > h as f32 * DETECTION_ROTATE_RATIO {
        log::debug!("rotating {w}x{h} image for type detection");
        img.rotate90()
    } else {
        img.clone()
    }
}

/// Encode as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(buf)
}

/// Downscale so neither side exceeds `max_dimension` and encode as JPEG.
///
/// Images already small enough are not upscaled.
pub fn thumbnail_jpeg(img: &DynamicImage, max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let (w, h) = img.dimensions();
    let resized = if w > max_dimension || h > max_dimension {
        img.thumbnail(max_dimension, max_dimension)
    } else {
        img.clone()
    };

    // JPEG has no alpha channel
    let rgb = resized.to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .context("Failed to encode JPEG")?;
    Ok(buf)
}
