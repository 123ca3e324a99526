//! Draw destinations, temporary buffer allocation and the compositing kernel.
//!
//! # Design Decisions
//!
//! - **Sample-point membership**: [`blit`] decides whether a destination pixel
//!   belongs to a source by mapping the pixel centre back into source space and
//!   testing it against the source's window. Adjacent windows therefore partition
//!   the destination exactly, whether the windows are tiles or strips.
//!
//! - **Explicit allocation results**: temporary buffers go through a
//!   [`BufferAllocator`] which returns `Result`, so callers branch on
//!   `OutOfMemory` instead of catching a panic.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::RasterError;
use crate::geometry::{Rect, Transform};

// =============================================================================
// Pixel format
// =============================================================================

/// Pixel layout of a raster or destination. Pixels are always stored as RGBA8;
/// `Rgb8` data carries an opaque alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::Rgba8)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

// =============================================================================
// Canvas
// =============================================================================

/// A destination image that rasters are drawn onto.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    image: RgbaImage,
    format: PixelFormat,
}

impl Canvas {
    /// A blank canvas: transparent for `Rgba8`, opaque black for `Rgb8`.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let fill = if format.has_alpha() {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([0, 0, 0, 255])
        };
        Self::filled(width, height, format, fill)
    }

    pub fn filled(width: u32, height: u32, format: PixelFormat, color: Rgba<u8>) -> Self {
        let mut color = color;
        if !format.has_alpha() {
            color.0[3] = 255;
        }
        Self {
            image: RgbaImage::from_pixel(width, height, color),
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width() as u64, self.height() as u64)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

// =============================================================================
// Allocation
// =============================================================================

/// Gatekeeper for temporary allocations made while drawing or aggregating.
pub trait BufferAllocator: Send + Sync {
    /// Check that `bytes` may be allocated.
    fn reserve(&self, bytes: usize) -> Result<(), RasterError>;
}

/// Allocator backed by the global heap; `reserve` always succeeds and the
/// actual allocation uses `try_reserve_exact`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl BufferAllocator for SystemAllocator {
    fn reserve(&self, _bytes: usize) -> Result<(), RasterError> {
        Ok(())
    }
}

/// Allocate a zeroed (fully transparent) RGBA image through `allocator`.
pub fn allocate_image(
    allocator: &dyn BufferAllocator,
    width: u32,
    height: u32,
) -> Result<RgbaImage, RasterError> {
    let bytes = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or(RasterError::OutOfMemory {
            requested: usize::MAX,
        })?;
    allocator.reserve(bytes)?;

    let mut raw: Vec<u8> = Vec::new();
    raw.try_reserve_exact(bytes)
        .map_err(|_| RasterError::OutOfMemory { requested: bytes })?;
    raw.resize(bytes, 0);

    RgbaImage::from_raw(width, height, raw).ok_or(RasterError::OutOfMemory { requested: bytes })
}

// =============================================================================
// Resampling
// =============================================================================

/// Filter used when mapping source pixels onto the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
}

impl Resampling {
    /// Source pixels needed beyond a sample's own pixel, in each direction.
    pub fn neighborhood(&self) -> i64 {
        match self {
            Resampling::Nearest => 0,
            Resampling::Bilinear => 1,
        }
    }
}

// =============================================================================
// Compositing kernel
// =============================================================================

/// A source image together with the pixels that may be read and the sample
/// window that decides which destination pixels it owns. Both rectangles are in
/// the source image's own pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct SourceView<'a> {
    pub image: &'a RgbaImage,
    pub bounds: Rect,
    pub window: Rect,
}

impl<'a> SourceView<'a> {
    /// View over the whole image.
    pub fn whole(image: &'a RgbaImage) -> Self {
        let bounds = Rect::new(0, 0, image.width() as u64, image.height() as u64);
        Self {
            image,
            bounds,
            window: bounds,
        }
    }

    /// Clamp `bounds` to the image and `window` to `bounds`.
    pub fn new(image: &'a RgbaImage, bounds: Rect, window: Rect) -> Option<Self> {
        let full = Rect::new(0, 0, image.width() as u64, image.height() as u64);
        let bounds = bounds.intersect(&full)?;
        let window = window.intersect(&bounds)?;
        Some(Self {
            image,
            bounds,
            window,
        })
    }

    fn texel(&self, x: i64, y: i64) -> [f64; 4] {
        let x = x.clamp(self.bounds.x0, self.bounds.x1 - 1) as u32;
        let y = y.clamp(self.bounds.y0, self.bounds.y1 - 1) as u32;
        let p = self.image.get_pixel(x, y).0;
        [p[0] as f64, p[1] as f64, p[2] as f64, p[3] as f64]
    }

    fn sample(&self, sx: f64, sy: f64, resampling: Resampling) -> [f64; 4] {
        match resampling {
            Resampling::Nearest => self.texel(sx.floor() as i64, sy.floor() as i64),
            Resampling::Bilinear => {
                let u = sx - 0.5;
                let v = sy - 0.5;
                let x0 = u.floor();
                let y0 = v.floor();
                let fx = u - x0;
                let fy = v - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);

                // Interpolate premultiplied values so transparent texels don't bleed colour.
                let mut acc = [0.0f64; 4];
                for (dx, dy, w) in [
                    (0, 0, (1.0 - fx) * (1.0 - fy)),
                    (1, 0, fx * (1.0 - fy)),
                    (0, 1, (1.0 - fx) * fy),
                    (1, 1, fx * fy),
                ] {
                    let t = self.texel(x0 + dx, y0 + dy);
                    let a = t[3] / 255.0;
                    acc[0] += t[0] * a * w;
                    acc[1] += t[1] * a * w;
                    acc[2] += t[2] * a * w;
                    acc[3] += t[3] * w;
                }
                let a = acc[3] / 255.0;
                if a <= 0.0 {
                    [0.0, 0.0, 0.0, 0.0]
                } else {
                    [acc[0] / a, acc[1] / a, acc[2] / a, acc[3]]
                }
            }
        }
    }
}

fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Porter-Duff source-over of straight-alpha colours.
fn source_over(src: [f64; 4], dst: [u8; 4], dest_has_alpha: bool) -> [u8; 4] {
    let sa = src[3] / 255.0;
    let da = if dest_has_alpha {
        dst[3] as f64 / 255.0
    } else {
        1.0
    };
    let oa = sa + da * (1.0 - sa);
    if oa <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        out[c] = to_u8((src[c] * sa + dst[c] as f64 * da * (1.0 - sa)) / oa);
    }
    out[3] = to_u8(oa * 255.0);
    out
}

/// Draw `src` onto `dest` through `transform` (source → destination).
///
/// Only destination pixels inside `clip` whose centre maps into `src.window`
/// are written. With `blend` the source is composited with source-over,
/// otherwise it replaces the destination pixel.
pub fn blit(
    dest: &mut RgbaImage,
    dest_has_alpha: bool,
    src: &SourceView<'_>,
    transform: &Transform,
    clip: &Rect,
    resampling: Resampling,
    blend: bool,
) -> Result<(), RasterError> {
    let inverse = transform.inverse()?;
    let dest_bounds = Rect::new(0, 0, dest.width() as u64, dest.height() as u64);
    let Some(area) = transform
        .map_rect(&src.window)
        .intersect(clip)
        .and_then(|r| r.intersect(&dest_bounds))
    else {
        return Ok(());
    };

    for dy in area.y0..area.y1 {
        for dx in area.x0..area.x1 {
            let (sx, sy) = inverse.apply(dx as f64 + 0.5, dy as f64 + 0.5);
            if !src.window.contains_point(sx, sy) {
                continue;
            }
            let color = src.sample(sx, sy, resampling);
            let pixel = dest.get_pixel_mut(dx as u32, dy as u32);
            pixel.0 = if blend {
                source_over(color, pixel.0, dest_has_alpha)
            } else {
                let alpha = if dest_has_alpha { to_u8(color[3]) } else { 255 };
                [to_u8(color[0]), to_u8(color[1]), to_u8(color[2]), alpha]
            };
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
