//! Integer rectangles, region shapes, run-length masks and axis-aligned transforms.
//!
//! All raster-space coordinates are pixel indices with half-open extents:
//! a `Rect` covers `[x0, x1) × [y0, y1)`. Destination-space math goes through
//! [`Transform`], which only supports scale + translation (no rotation or shear).

use serde::{Deserialize, Serialize};

use crate::error::RasterError;

// =============================================================================
// Rect
// =============================================================================

/// A half-open integer rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Rect {
    /// Create a rectangle from its origin and size.
    pub fn new(x: i64, y: i64, width: u64, height: u64) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + width as i64,
            y1: y + height as i64,
        }
    }

    /// Create a rectangle from two corners (the second one exclusive).
    pub fn from_corners(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> u64 {
        (self.x1 - self.x0).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.y1 - self.y0).max(0) as u64
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// Intersection of two rectangles, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        (!r.is_empty()).then_some(r)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }

    /// Whether pixel `(x, y)` lies inside the rectangle.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Whether a continuous point lies inside the rectangle.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x0 as f64 && x < self.x1 as f64 && y >= self.y0 as f64 && y < self.y1 as f64
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.x0 >= self.x0
                && other.y0 >= self.y0
                && other.x1 <= self.x1
                && other.y1 <= self.y1)
    }

    pub fn translate(&self, dx: i64, dy: i64) -> Rect {
        Rect {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }

    /// Smallest rectangle containing both.
    pub fn union_bounds(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Grow the rectangle by `n` pixels on every side.
    pub fn expand(&self, n: i64) -> Rect {
        Rect {
            x0: self.x0 - n,
            y0: self.y0 - n,
            x1: self.x1 + n,
            y1: self.y1 + n,
        }
    }
}

// =============================================================================
// Region
// =============================================================================

/// A shape expressed as a union of rectangles.
///
/// Members may overlap; membership is decided per pixel so overlapping members
/// never count a pixel twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.push(rect);
        region
    }

    /// Add a rectangle to the union. Empty rectangles are ignored.
    pub fn push(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Bounding box of the union, `None` for an empty region.
    pub fn bounds(&self) -> Option<Rect> {
        let mut iter = self.rects.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, r| acc.union_bounds(r)))
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.rects.iter().any(|r| r.contains(x, y))
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    /// Clip every member to `rect`.
    pub fn intersect_rect(&self, rect: &Rect) -> Region {
        Region {
            rects: self.rects.iter().filter_map(|r| r.intersect(rect)).collect(),
        }
    }

    /// Pairwise intersection of two unions.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut out = Region::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(r) = a.intersect(b) {
                    out.push(r);
                }
            }
        }
        out
    }

    /// True when a single member fully contains `rect`.
    ///
    /// Conservative: a rect covered only by several members reports `false`.
    pub fn covers(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.contains_rect(rect))
    }

    /// Number of distinct pixels covered by the region.
    pub fn pixel_count(&self) -> u64 {
        let Some(bounds) = self.bounds() else {
            return 0;
        };
        let mut count = 0;
        for y in bounds.y0..bounds.y1 {
            for x in bounds.x0..bounds.x1 {
                if self.contains(x, y) {
                    count += 1;
                }
            }
        }
        count
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

// =============================================================================
// RLE mask
// =============================================================================

/// One horizontal run of set pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub x: i64,
    pub len: u64,
}

/// A run-length encoded mask. Row `i` covers raster row `origin_y + i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RleMask {
    origin_y: i64,
    rows: Vec<Vec<Run>>,
}

impl RleMask {
    pub fn new(origin_y: i64) -> Self {
        Self {
            origin_y,
            rows: Vec::new(),
        }
    }

    /// Append the runs for the next row.
    pub fn push_row(&mut self, runs: Vec<Run>) {
        self.rows.push(runs);
    }

    /// Build a mask covering exactly `rect`.
    pub fn from_rect(rect: Rect) -> Self {
        let mut mask = Self::new(rect.y0);
        for _ in rect.y0..rect.y1 {
            mask.push_row(vec![Run {
                x: rect.x0,
                len: rect.width(),
            }]);
        }
        mask
    }

    pub fn bounds(&self) -> Option<Rect> {
        let mut bounds: Option<Rect> = None;
        for (i, row) in self.rows.iter().enumerate() {
            let y = self.origin_y + i as i64;
            for run in row.iter().filter(|r| r.len > 0) {
                let r = Rect::new(run.x, y, run.len, 1);
                bounds = Some(match bounds {
                    Some(b) => b.union_bounds(&r),
                    None => r,
                });
            }
        }
        bounds
    }

    /// Clipped spans `(y, x0, x1)` of the mask inside `rect`.
    pub fn runs_in(&self, rect: &Rect) -> Vec<(i64, i64, i64)> {
        let mut spans = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let y = self.origin_y + i as i64;
            if y < rect.y0 || y >= rect.y1 {
                continue;
            }
            for run in row {
                let x0 = run.x.max(rect.x0);
                let x1 = (run.x + run.len as i64).min(rect.x1);
                if x1 > x0 {
                    spans.push((y, x0, x1));
                }
            }
        }
        spans
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        !self.runs_in(rect).is_empty()
    }

    /// True when every row of `rect` is fully inside a single run.
    pub fn covers(&self, rect: &Rect) -> bool {
        if rect.is_empty() {
            return true;
        }
        (rect.y0..rect.y1).all(|y| {
            let i = y - self.origin_y;
            if i < 0 || i as usize >= self.rows.len() {
                return false;
            }
            self.rows[i as usize]
                .iter()
                .any(|run| run.x <= rect.x0 && run.x + run.len as i64 >= rect.x1)
        })
    }
}

// =============================================================================
// Transform
// =============================================================================

/// Axis-aligned affine transform: `p' = p * scale + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::identity()
        }
    }

    pub fn scaling(scale_x: f64, scale_y: f64) -> Self {
        Self {
            scale_x,
            scale_y,
            ..Self::identity()
        }
    }

    /// Apply `inner` first, then `self`.
    pub fn then(&self, inner: &Transform) -> Transform {
        Transform {
            scale_x: self.scale_x * inner.scale_x,
            scale_y: self.scale_y * inner.scale_y,
            tx: self.scale_x * inner.tx + self.tx,
            ty: self.scale_y * inner.ty + self.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale_x + self.tx, y * self.scale_y + self.ty)
    }

    pub fn is_valid(&self) -> bool {
        self.scale_x.is_finite()
            && self.scale_y.is_finite()
            && self.tx.is_finite()
            && self.ty.is_finite()
            && self.scale_x > 0.0
            && self.scale_y > 0.0
    }

    pub fn inverse(&self) -> Result<Transform, RasterError> {
        if !self.is_valid() {
            return Err(RasterError::InvalidTransform(format!(
                "cannot invert scale ({}, {})",
                self.scale_x, self.scale_y
            )));
        }
        Ok(Transform {
            scale_x: 1.0 / self.scale_x,
            scale_y: 1.0 / self.scale_y,
            tx: -self.tx / self.scale_x,
            ty: -self.ty / self.scale_y,
        })
    }

    /// Smallest integer rectangle containing the image of `rect`.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let (ax, ay) = self.apply(rect.x0 as f64, rect.y0 as f64);
        let (bx, by) = self.apply(rect.x1 as f64, rect.y1 as f64);
        Rect {
            x0: ax.min(bx).floor() as i64,
            y0: ay.min(by).floor() as i64,
            x1: ax.max(bx).ceil() as i64,
            y1: ay.max(by).ceil() as i64,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
