//! Tile Renderer
//!
//! Produces the RGB raster for one segment. The raster covers the segment's
//! full `nAxis1 × nAxis2` extent so the overscan regions can be shown on
//! request; only datasec pixels are written, the rest stay zero.
//!
//! Integer data goes through bias correction and the histogram-equalized color
//! lookup (per-segment or global, see the scaling module). Float data has no
//! ADC binning to equalize; it gets a min/max rescale of its occupied range
//! onto the colormap instead.
//!
//! Rendering is pure: the same segment, pixels, factors, scale and map always
//! produce the same tile, which is what makes tiles cacheable.

use focaltile_core::{PixelBuffer, RawData, Result, Segment};

use crate::bias::CorrectionFactors;
use crate::colormap::RgbColorMap;
use crate::scaling::{build_color_lookup, Histogram, ScaleBins, ADC_BINS};

/// RGB raster for one segment, `0x00RRGGBB` packed, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTile {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<u32>,
}

impl RenderedTile {
    fn blank(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn get(&self, x: i32, y: i32) -> u32 {
        self.pixels[(x + y * self.width) as usize]
    }

    /// Cache weight of the raster.
    pub fn weight_bytes(&self) -> u64 {
        self.pixels.len() as u64 * 4
    }
}

/// Render one segment's tile.
///
/// `global_scale` switches integer data from per-amplifier equalization to the
/// shared focal-plane histogram.
pub fn render_tile(
    segment: &Segment,
    raw: &RawData,
    factors: &CorrectionFactors,
    global_scale: Option<&[u64]>,
    cmap: &RgbColorMap,
) -> Result<RenderedTile> {
    match &raw.pixels {
        PixelBuffer::Int32(data) => Ok(render_int_tile(segment, data, factors, global_scale, cmap)),
        PixelBuffer::Float32(data) => Ok(render_float_tile(segment, data, cmap)),
    }
}

fn render_int_tile(
    segment: &Segment,
    data: &[i32],
    factors: &CorrectionFactors,
    global_scale: Option<&[u64]>,
    cmap: &RgbColorMap,
) -> RenderedTile {
    let datasec = segment.datasec;
    let per_segment;
    let bins = match global_scale {
        Some(global) => {
            tracing::trace!(%segment, "rendering with shared global scale");
            ScaleBins::Global(global)
        }
        None => {
            per_segment = Histogram::build(&datasec, data, segment.n_axis1, factors);
            ScaleBins::PerSegment(&per_segment)
        }
    };
    let lookup = build_color_lookup(bins, cmap);

    let mut tile = RenderedTile::blank(segment.n_axis1, segment.n_axis2);
    for y in datasec.y..datasec.y + datasec.height {
        let mut p = (datasec.x + y * segment.n_axis1) as usize;
        for x in datasec.x..datasec.x + datasec.width {
            let bin = (data[p].saturating_sub(factors.at(x, y)).max(0) as usize).min(ADC_BINS - 1);
            tile.pixels[p] = lookup[bin];
            p += 1;
        }
    }
    tile
}

fn render_float_tile(segment: &Segment, data: &[f32], cmap: &RgbColorMap) -> RenderedTile {
    let datasec = segment.datasec;

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for y in datasec.y..datasec.y + datasec.height {
        let row = (datasec.x + y * segment.n_axis1) as usize;
        for &f in &data[row..row + datasec.width as usize] {
            if f.is_finite() {
                min = min.min(f);
                max = max.max(f);
            }
        }
    }
    let span = if max > min { max - min } else { 1.0 };

    let mut tile = RenderedTile::blank(segment.n_axis1, segment.n_axis2);
    for y in datasec.y..datasec.y + datasec.height {
        let mut p = (datasec.x + y * segment.n_axis1) as usize;
        for _ in 0..datasec.width {
            let f = data[p];
            let index = if f.is_finite() {
                (((f - min) / span) * 255.0).clamp(0.0, 255.0) as usize
            } else {
                0
            };
            tile.pixels[p] = cmap.rgb(index);
            p += 1;
        }
    }
    tile
}
