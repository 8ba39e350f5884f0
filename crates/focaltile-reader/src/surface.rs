//! Composition Surface
//!
//! The reader does not own the output raster; the host hands it one through
//! `RenderSurface`. Tiles complete on arbitrary pool threads and each blit only
//! touches the tile's own output rectangle (focal-plane segments are disjoint
//! by construction), so the surface's only obligation is to make concurrent
//! disjoint-region writes safe.
//!
//! `MosaicImage` is the built-in implementation used by tests and examples. It
//! serializes blits with a mutex, trading parallel composition for simplicity;
//! an embedding UI would write into its own framebuffer instead.
//!
//! Each tile is drawn under its own composed transform (view ∘ placement) by
//! inverse mapping: walk the tile's output bounding box and sample the source
//! pixel under each output pixel center. Transforms never collapse across
//! tiles, so float error stays per-segment.

use std::sync::Mutex;

use focaltile_core::{Affine, Rect, RectF};
use focaltile_render::RenderedTile;

/// Host-provided render target.
pub trait RenderSurface: Send + Sync {
    /// Composite one tile.
    ///
    /// `placement` maps tile-local pixels (after `crop`, when present) to
    /// focal-plane coordinates; `crop` restricts the blit to a sub-rectangle of
    /// the tile (the datasec, unless overscan display is on).
    fn draw_tile(&self, tile: &RenderedTile, placement: &Affine, crop: Option<&Rect>);
}

/// A plain packed-RGB raster guarded by a mutex.
pub struct MosaicImage {
    width: i32,
    height: i32,
    /// Focal-plane → output-pixel transform (pan/zoom of the viewport).
    view: Affine,
    pixels: Mutex<Vec<u32>>,
}

impl MosaicImage {
    pub fn new(width: i32, height: i32, view: Affine) -> Self {
        Self {
            width,
            height,
            view,
            pixels: Mutex::new(vec![0; (width * height) as usize]),
        }
    }

    /// Viewport covering `region` of the focal plane, scaled onto a raster of
    /// `width × height`.
    pub fn for_region(width: i32, height: i32, region: &RectF) -> Self {
        let scale_x = width as f64 / region.width;
        let scale_y = height as f64 / region.height;
        let view = Affine::new(scale_x, 0.0, 0.0, scale_y, 0.0, 0.0)
            .translate(-region.x, -region.y);
        Self::new(width, height, view)
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn pixel(&self, x: i32, y: i32) -> u32 {
        self.pixels.lock().expect("mosaic lock")[(x + y * self.width) as usize]
    }

    pub fn pixels(&self) -> Vec<u32> {
        self.pixels.lock().expect("mosaic lock").clone()
    }

    /// Count of pixels that have been written non-black.
    pub fn lit_pixels(&self) -> usize {
        self.pixels
            .lock()
            .expect("mosaic lock")
            .iter()
            .filter(|&&p| p != 0)
            .count()
    }
}

impl RenderSurface for MosaicImage {
    fn draw_tile(&self, tile: &RenderedTile, placement: &Affine, crop: Option<&Rect>) {
        let device = self.view.then(placement);
        let Some(inverse) = device.invert() else {
            tracing::warn!("skipping tile with singular placement transform");
            return;
        };

        let (src_x, src_y, src_w, src_h) = match crop {
            Some(r) => (r.x, r.y, r.width, r.height),
            None => (0, 0, tile.width, tile.height),
        };

        let bounds = device.bounds_of(src_w as f64, src_h as f64);
        let x0 = (bounds.x.floor() as i32).max(0);
        let y0 = (bounds.y.floor() as i32).max(0);
        let x1 = ((bounds.x + bounds.width).ceil() as i32).min(self.width);
        let y1 = ((bounds.y + bounds.height).ceil() as i32).min(self.height);

        let mut pixels = self.pixels.lock().expect("mosaic lock");
        for oy in y0..y1 {
            for ox in x0..x1 {
                let (lx, ly) = inverse.apply(ox as f64 + 0.5, oy as f64 + 0.5);
                let sx = lx.floor() as i32;
                let sy = ly.floor() as i32;
                if sx >= 0 && sx < src_w && sy >= 0 && sy < src_h {
                    pixels[(ox + oy * self.width) as usize] =
                        tile.get(src_x + sx, src_y + sy);
                }
            }
        }
    }
}
