//! JPEG export of rendered canvases.
//!
//! JPEG has no alpha channel, so translucent pixels are flattened over a
//! background colour before encoding.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::canvas::Canvas;
use crate::error::RasterError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub const MIN_JPEG_QUALITY: u8 = 1;
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Background used when flattening translucent pixels.
pub const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];

/// Encode `canvas` as JPEG at `quality`, clamped to 1-100.
pub fn encode_jpeg(canvas: &Canvas, quality: u8) -> Result<Bytes, RasterError> {
    encode_jpeg_over(canvas, quality, DEFAULT_BACKGROUND)
}

/// Encode `canvas` as JPEG, flattening alpha over `background`.
pub fn encode_jpeg_over(
    canvas: &Canvas,
    quality: u8,
    background: [u8; 3],
) -> Result<Bytes, RasterError> {
    let quality = quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
    let rgb = flatten(canvas, background);

    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| RasterError::Encode {
            message: e.to_string(),
        })?;

    Ok(Bytes::from(output))
}

fn flatten(canvas: &Canvas, background: [u8; 3]) -> RgbImage {
    let has_alpha = canvas.format().has_alpha();
    RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let [r, g, b, a] = canvas.pixel(x, y).0;
        if !has_alpha || a == 255 {
            return Rgb([r, g, b]);
        }
        let alpha = a as u32;
        let mix = |c: u8, bg: u8| ((c as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
        Rgb([
            mix(r, background[0]),
            mix(g, background[1]),
            mix(b, background[2]),
        ])
    })
}
