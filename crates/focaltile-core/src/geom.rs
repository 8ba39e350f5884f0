//! Pixel-grid and focal-plane geometry.
//!
//! Two rectangle types cover the two coordinate systems in play: `Rect` is the
//! integer pixel grid of one segment (DATASEC, tile bounds), `RectF` is the
//! continuous focal-plane system that world-coordinate affines map into. `Affine`
//! mirrors the six-element `(m00, m10, m01, m11, m02, m12)` convention of the FITS
//! PC-matrix keywords:
//!
//! ```text
//! | x' |   | m00  m01  m02 | | x |
//! | y' | = | m10  m11  m12 | | y |
//! ```

use serde::{Deserialize, Serialize};

/// Integer rectangle on a segment's pixel grid. Zero-based, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// True when `self` lies entirely inside `other`.
    pub fn within(&self, other: &Rect) -> bool {
        self.x >= other.x
            && self.y >= other.y
            && self.x + self.width <= other.x + other.width
            && self.y + self.height <= other.y + other.height
    }
}

/// Axis-aligned rectangle in focal-plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectF {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn intersects(&self, other: &RectF) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// 2D affine transform in FITS PC-matrix element order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m11: f64,
    pub m02: f64,
    pub m12: f64,
}

impl Affine {
    pub fn new(m00: f64, m10: f64, m01: f64, m11: f64, m02: f64, m12: f64) -> Self {
        Self {
            m00,
            m10,
            m01,
            m11,
            m02,
            m12,
        }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Pure translation.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// Post-concatenate a translation, i.e. `self ∘ translate(tx, ty)`.
    ///
    /// The translation is expressed in the *local* (pre-transform) frame, matching
    /// how a DATASEC origin offset is folded into a segment's world transform.
    pub fn translate(&self, tx: f64, ty: f64) -> Self {
        Self {
            m02: self.m02 + self.m00 * tx + self.m01 * ty,
            m12: self.m12 + self.m10 * tx + self.m11 * ty,
            ..*self
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn then(&self, other: &Affine) -> Self {
        Self {
            m00: self.m00 * other.m00 + self.m01 * other.m10,
            m10: self.m10 * other.m00 + self.m11 * other.m10,
            m01: self.m00 * other.m01 + self.m01 * other.m11,
            m11: self.m10 * other.m01 + self.m11 * other.m11,
            m02: self.m00 * other.m02 + self.m01 * other.m12 + self.m02,
            m12: self.m10 * other.m02 + self.m11 * other.m12 + self.m12,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m00 * x + self.m01 * y + self.m02,
            self.m10 * x + self.m11 * y + self.m12,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<Affine> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let m00 = self.m11 / det;
        let m01 = -self.m01 / det;
        let m10 = -self.m10 / det;
        let m11 = self.m00 / det;
        Some(Affine {
            m00,
            m10,
            m01,
            m11,
            m02: -(m00 * self.m02 + m01 * self.m12),
            m12: -(m10 * self.m02 + m11 * self.m12),
        })
    }

    /// Axis-aligned bounding box of the images of `(0,0)` and `(w,h)`.
    ///
    /// Because segment transforms are compositions of flips, axis swaps and
    /// translations, the two opposite corners are enough to bound the image.
    pub fn bounds_of(&self, width: f64, height: f64) -> RectF {
        let (x0, y0) = self.apply(0.0, 0.0);
        let (x1, y1) = self.apply(width, height);
        RectF {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x0 - x1).abs(),
            height: (y0 - y1).abs(),
        }
    }
}
