//! Bias Correction Strategies
//!
//! CCD readout superimposes an electronic bias on every pixel. The overscan
//! regions, columns and rows clocked out with no illumination, measure that
//! bias, and each strategy here turns overscan statistics into per-pixel
//! correction factors that the scaling engine subtracts before histogramming.
//!
//! Regions, relative to a segment's full `nAxis1 × nAxis2` grid:
//!
//! ```text
//!        ┌──────────────┬────┐
//!        │   parallel   │    │   parallel = rows outside datasec (in-span cols)
//!        ├──────────────┼────┤
//!        │              │ s  │
//!        │   datasec    │ e  │   serial = columns outside datasec (in-span rows)
//!        │              │ r  │
//!        └──────────────┴────┘
//! ```
//!
//! All strategies are pure: identical `(segment, strategy)` inputs produce
//! identical factors, which is what lets the factors cache key on that pair.
//! Means are accumulated in `i64`, so results are exact and independent of
//! pixel order. Float segments carry no overscan convention and always get
//! no-op factors.

use focaltile_core::{Error, Rect, Result, Segment};

/// Menu of selectable bias-correction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiasKind {
    None,
    SimpleOverscanCorrection,
    SimpleOverscanSubtraction,
    SimpleOverscanSubtraction2,
    SimpleOverscanSubOnly,
}

impl BiasKind {
    pub const ALL: [BiasKind; 5] = [
        BiasKind::None,
        BiasKind::SimpleOverscanCorrection,
        BiasKind::SimpleOverscanSubtraction,
        BiasKind::SimpleOverscanSubtraction2,
        BiasKind::SimpleOverscanSubOnly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BiasKind::None => "None",
            BiasKind::SimpleOverscanCorrection => "SimpleOverscanCorrection",
            BiasKind::SimpleOverscanSubtraction => "SimpleOverscanSubtraction",
            BiasKind::SimpleOverscanSubtraction2 => "SimpleOverscanSubtraction2",
            BiasKind::SimpleOverscanSubOnly => "SimpleOverscanSubOnly",
        }
    }

    pub fn from_name(name: &str) -> Result<BiasKind> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| Error::UnknownStrategy {
                kind: "bias correction",
                name: name.to_string(),
            })
    }

    /// Compute correction factors for one segment's pixel data.
    ///
    /// `data` is the full decoded buffer; `None` marks a float segment, which
    /// always yields no-op factors.
    pub fn compute(&self, data: Option<&[i32]>, segment: &Segment) -> Result<CorrectionFactors> {
        let data = match (self, data) {
            (BiasKind::None, _) | (_, None) => return Ok(CorrectionFactors::NoOp),
            (_, Some(data)) => data,
        };
        let expected = segment.n_axis1 as usize * segment.n_axis2 as usize;
        if data.len() < expected {
            return Err(Error::Internal(format!(
                "bias input holds {} of {expected} samples for {segment}",
                data.len()
            )));
        }

        let datasec = segment.datasec;
        match self {
            BiasKind::None => unreachable!("handled above"),
            BiasKind::SimpleOverscanCorrection => Ok(CorrectionFactors::RowTable {
                y0: datasec.y,
                rows: serial_row_means(data, segment),
                overall: serial_mean(data, segment),
            }),
            BiasKind::SimpleOverscanSubtraction => Ok(CorrectionFactors::Scalar {
                value: serial_mean(data, segment),
            }),
            BiasKind::SimpleOverscanSubtraction2 => Ok(CorrectionFactors::Combined {
                y0: datasec.y,
                rows: serial_row_means(data, segment),
                x0: datasec.x,
                cols: parallel_col_means(data, segment),
                overall: serial_mean(data, segment),
            }),
            BiasKind::SimpleOverscanSubOnly => Ok(CorrectionFactors::ColTable {
                x0: datasec.x,
                cols: parallel_col_means(data, segment),
                overall: parallel_mean(data, segment),
            }),
        }
    }
}

/// Per-pixel correction factors over a segment's datasec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionFactors {
    NoOp,
    Scalar {
        value: i32,
    },
    RowTable {
        y0: i32,
        rows: Vec<i32>,
        overall: i32,
    },
    ColTable {
        x0: i32,
        cols: Vec<i32>,
        overall: i32,
    },
    Combined {
        y0: i32,
        rows: Vec<i32>,
        x0: i32,
        cols: Vec<i32>,
        overall: i32,
    },
}

impl CorrectionFactors {
    /// Correction at a datasec pixel.
    pub fn at(&self, x: i32, y: i32) -> i32 {
        match self {
            CorrectionFactors::NoOp => 0,
            CorrectionFactors::Scalar { value } => *value,
            CorrectionFactors::RowTable { y0, rows, .. } => rows[(y - y0) as usize],
            CorrectionFactors::ColTable { x0, cols, .. } => cols[(x - x0) as usize],
            CorrectionFactors::Combined {
                y0,
                rows,
                x0,
                cols,
                overall,
            } => rows[(y - y0) as usize] + cols[(x - x0) as usize] - overall,
        }
    }

    /// The strategy's single-number summary, for inspection and tests.
    pub fn overall_correction(&self) -> i32 {
        match self {
            CorrectionFactors::NoOp => 0,
            CorrectionFactors::Scalar { value } => *value,
            CorrectionFactors::RowTable { overall, .. }
            | CorrectionFactors::ColTable { overall, .. }
            | CorrectionFactors::Combined { overall, .. } => *overall,
        }
    }
}

/// Serial-overscan columns for one row: every column outside the datasec x-span.
fn serial_columns(segment: &Segment) -> impl Iterator<Item = i32> + '_ {
    let datasec = segment.datasec;
    (0..segment.n_axis1).filter(move |x| *x < datasec.x || *x >= datasec.x + datasec.width)
}

/// Parallel-overscan rows: every row outside the datasec y-span.
fn parallel_rows(segment: &Segment) -> impl Iterator<Item = i32> + '_ {
    let datasec = segment.datasec;
    (0..segment.n_axis2).filter(move |y| *y < datasec.y || *y >= datasec.y + datasec.height)
}

fn sample(data: &[i32], segment: &Segment, x: i32, y: i32) -> i64 {
    data[(x + y * segment.n_axis1) as usize] as i64
}

fn rounded_mean(sum: i64, count: i64) -> i32 {
    if count == 0 {
        0
    } else {
        (sum as f64 / count as f64).round() as i32
    }
}

/// Mean of the whole serial overscan region.
fn serial_mean(data: &[i32], segment: &Segment) -> i32 {
    let datasec = segment.datasec;
    let mut sum = 0i64;
    let mut count = 0i64;
    for y in datasec.y..datasec.y + datasec.height {
        for x in serial_columns(segment) {
            sum += sample(data, segment, x, y);
            count += 1;
        }
    }
    rounded_mean(sum, count)
}

/// Mean of the whole parallel overscan region.
fn parallel_mean(data: &[i32], segment: &Segment) -> i32 {
    let datasec = segment.datasec;
    let mut sum = 0i64;
    let mut count = 0i64;
    for y in parallel_rows(segment) {
        for x in datasec.x..datasec.x + datasec.width {
            sum += sample(data, segment, x, y);
            count += 1;
        }
    }
    rounded_mean(sum, count)
}

/// Serial-overscan mean per datasec row.
fn serial_row_means(data: &[i32], segment: &Segment) -> Vec<i32> {
    let datasec = segment.datasec;
    (datasec.y..datasec.y + datasec.height)
        .map(|y| {
            let mut sum = 0i64;
            let mut count = 0i64;
            for x in serial_columns(segment) {
                sum += sample(data, segment, x, y);
                count += 1;
            }
            rounded_mean(sum, count)
        })
        .collect()
}

/// Parallel-overscan mean per datasec column.
fn parallel_col_means(data: &[i32], segment: &Segment) -> Vec<i32> {
    let datasec = segment.datasec;
    (datasec.x..datasec.x + datasec.width)
        .map(|x| {
            let mut sum = 0i64;
            let mut count = 0i64;
            for y in parallel_rows(segment) {
                sum += sample(data, segment, x, y);
                count += 1;
            }
            rounded_mean(sum, count)
        })
        .collect()
}

/// True when a strategy's factors cover every datasec pixel (test support).
pub fn total_over(factors: &CorrectionFactors, datasec: &Rect) -> bool {
    for y in datasec.y..datasec.y + datasec.height {
        for x in datasec.x..datasec.x + datasec.width {
            let _ = factors.at(x, y);
        }
    }
    true
}
