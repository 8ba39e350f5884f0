//! Histogram-Equalization Scaling Engine
//!
//! Camera samples are 18-bit ADC counts; displays want 8-bit indices. The
//! mapping is histogram equalization: build a dense 2^18-bin histogram of the
//! bias-corrected science pixels, take its CDF, and scale the CDF onto the
//! colormap's 256 entries. Sparse or skewed data then still spreads across the
//! full display range.
//!
//! Per-amplifier scaling histograms each segment on its own; global scaling sums
//! every segment's histogram first so the whole focal plane shares one intensity
//! mapping. The sum is element-wise and commutative, so merge order never
//! changes the result.

use focaltile_core::Rect;

use crate::bias::CorrectionFactors;
use crate::colormap::RgbColorMap;

/// Fixed bin count for 18-bit camera ADC data.
pub const ADC_BINS: usize = 1 << 18;

/// Dense per-segment histogram with its occupied range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    bins: Vec<u32>,
    lowest: usize,
    highest: usize,
    total: u64,
}

impl Histogram {
    /// Histogram the bias-corrected samples of `data_rect`.
    ///
    /// Corrected values below zero clamp into bin 0; values off the top of the
    /// ADC range clamp into the last bin rather than crashing.
    pub fn build(
        data_rect: &Rect,
        data: &[i32],
        n_axis1: i32,
        factors: &CorrectionFactors,
    ) -> Histogram {
        let mut bins = vec![0u32; ADC_BINS];
        let mut total = 0u64;
        for y in data_rect.y..data_rect.y + data_rect.height {
            let mut p = (data_rect.x + y * n_axis1) as usize;
            for x in data_rect.x..data_rect.x + data_rect.width {
                let corrected = data[p].saturating_sub(factors.at(x, y)).max(0);
                let bin = (corrected as usize).min(ADC_BINS - 1);
                bins[bin] += 1;
                total += 1;
                p += 1;
            }
        }
        let (lowest, highest) = occupied_range_u32(&bins).unwrap_or((0, 0));
        Histogram {
            bins,
            lowest,
            highest,
            total,
        }
    }

    pub fn count(&self, bin: usize) -> u32 {
        self.bins[bin]
    }

    pub fn lowest_occupied(&self) -> usize {
        self.lowest
    }

    pub fn highest_occupied(&self) -> usize {
        self.highest
    }

    /// Total samples histogrammed; equals the data rectangle's area.
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Sum per-segment histograms into one global bin array.
pub fn merge_global<'a>(histograms: impl IntoIterator<Item = &'a Histogram>) -> Vec<u64> {
    let mut counts = vec![0u64; ADC_BINS];
    for histogram in histograms {
        for bin in histogram.lowest..=histogram.highest {
            counts[bin] += histogram.count(bin) as u64;
        }
    }
    counts
}

/// The bins a color lookup is derived from: one segment's own histogram or a
/// shared global array.
#[derive(Debug, Clone, Copy)]
pub enum ScaleBins<'a> {
    PerSegment(&'a Histogram),
    Global(&'a [u64]),
}

impl ScaleBins<'_> {
    fn occupied_range(&self) -> Option<(usize, usize)> {
        match self {
            ScaleBins::PerSegment(h) => (h.total > 0).then_some((h.lowest, h.highest)),
            ScaleBins::Global(bins) => occupied_range_u64(bins),
        }
    }

    fn count(&self, bin: usize) -> u64 {
        match self {
            ScaleBins::PerSegment(h) => h.count(bin) as u64,
            ScaleBins::Global(bins) => bins[bin],
        }
    }
}

/// Build the ADC-value → packed-RGB lookup for one tile.
///
/// Only the occupied range is populated; the tile renderer never samples
/// outside it because every corrected pixel landed in a bin. The CDF runs in
/// `u64`: a full focal plane of 3-billion-odd samples overflows `u32`.
pub fn build_color_lookup(bins: ScaleBins<'_>, cmap: &RgbColorMap) -> Vec<u32> {
    let mut lookup = vec![0u32; ADC_BINS];
    let Some((lowest, highest)) = bins.occupied_range() else {
        return lookup;
    };

    let mut cdf = 0u64;
    let mut cumulative = vec![0u64; highest - lowest + 1];
    for (i, slot) in cumulative.iter_mut().enumerate() {
        cdf += bins.count(lowest + i);
        *slot = cdf;
    }

    let range = 1 + cdf / 256;
    for (i, cumulative) in cumulative.iter().enumerate() {
        lookup[lowest + i] = cmap.rgb((cumulative / range) as usize);
    }
    lookup
}

fn occupied_range_u32(bins: &[u32]) -> Option<(usize, usize)> {
    let lowest = bins.iter().position(|&c| c > 0)?;
    let highest = bins.iter().rposition(|&c| c > 0)?;
    Some((lowest, highest))
}

fn occupied_range_u64(bins: &[u64]) -> Option<(usize, usize)> {
    let lowest = bins.iter().position(|&c| c > 0)?;
    let highest = bins.iter().rposition(|&c| c > 0)?;
    Some((lowest, highest))
}
