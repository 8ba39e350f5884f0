pub mod bias;
pub mod colormap;
pub mod scaling;
pub mod tile;

pub use bias::{BiasKind, CorrectionFactors};
pub use colormap::{color_map, default_color_map, RgbColorMap, COLOR_MAP_NAMES};
pub use scaling::{build_color_lookup, merge_global, Histogram, ScaleBins, ADC_BINS};
pub use tile::{render_tile, RenderedTile};
