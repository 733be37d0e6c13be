//! The lossy page codec: JPEG at a fixed high quality, RGBA8 in and out.
//!
//! JPEG carries no alpha channel, so the alpha plane is dropped on encode and
//! restored as opaque on decode. Page pixels are always opaque in this
//! pipeline, so the round trip is lossy only in the chroma/luma sense.

use image::codecs::jpeg::JpegEncoder;

use crate::error::{VirtualTextureError, VtResult};
use crate::raster::CHANNEL_COUNT;

/// Fixed encode quality for page blocks.
pub const JPEG_QUALITY: u8 = 90;

/// Encode one square RGBA8 page into `out` (cleared first).
pub fn encode_page(pixels: &[u8], size: usize, out: &mut Vec<u8>) -> VtResult<()> {
    debug_assert_eq!(pixels.len(), size * size * CHANNEL_COUNT);
    out.clear();

    let mut rgb = Vec::with_capacity(size * size * 3);
    for px in pixels.chunks_exact(CHANNEL_COUNT) {
        rgb.extend_from_slice(&px[..3]);
    }

    let mut encoder = JpegEncoder::new_with_quality(&mut *out, JPEG_QUALITY);
    encoder
        .encode(&rgb, size as u32, size as u32, image::ColorType::Rgb8)
        .map_err(|e| VirtualTextureError::Codec(format!("jpeg encode failed: {}", e)))?;
    Ok(())
}

/// Decode one compressed page block into the fixed RGBA8 footprint `out`.
pub fn decode_page(bytes: &[u8], out: &mut [u8]) -> VtResult<()> {
    let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .map_err(|e| VirtualTextureError::Codec(format!("jpeg decode failed: {}", e)))?;
    let rgba = decoded.to_rgba8();

    if rgba.as_raw().len() != out.len() {
        return Err(VirtualTextureError::Codec(format!(
            "decoded page is {}x{}, expected {} bytes",
            rgba.width(),
            rgba.height(),
            out.len()
        )));
    }
    out.copy_from_slice(rgba.as_raw());
    Ok(())
}
