//! Image encoding for cached generation results.
//!
//! Images are stored as PNG so the round trip is lossless. Decoded images
//! are always RGBA8, which is what the pipelines hand around.

use crate::error::Result;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Encode `image` as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
    let mut buf = Cursor::new(Vec::new());
    rgba.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Decode stored bytes into an RGBA8 image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(DynamicImage::ImageRgba8(image.into_rgba8()))
}
