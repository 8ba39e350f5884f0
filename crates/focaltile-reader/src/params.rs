//! Render Parameter Surface
//!
//! Everything a client can vary per render request: the focal-plane region, the
//! colormap and bias-correction menus, the WCS selection letter, the scaling
//! mode, an optional precomputed global scale and an optional WCS override
//! table.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use focaltile_core::RectF;
use focaltile_fits::WcsOverride;
use focaltile_render::{default_color_map, BiasKind, RgbColorMap};

/// Intensity-scaling mode: one shared mapping for the whole exposure, or an
/// independent mapping per amplifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScaleMode {
    Global,
    #[default]
    Amplifier,
}

/// Handle to a merged global histogram.
///
/// Identity, not content, keys the rendered-tile cache: two handles compare
/// equal only when they share the same underlying array, exactly like passing
/// the same array reference around in the host application.
#[derive(Debug, Clone)]
pub struct GlobalScale(Arc<Vec<u64>>);

impl GlobalScale {
    pub fn new(bins: Arc<Vec<u64>>) -> Self {
        Self(bins)
    }

    pub fn bins(&self) -> &[u64] {
        &self.0
    }
}

impl PartialEq for GlobalScale {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for GlobalScale {}

impl Hash for GlobalScale {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Per-request render options.
#[derive(Debug, Clone)]
pub struct RenderParams {
    /// Focal-plane region to render; `None` accepts every segment.
    pub source_region: Option<RectF>,
    /// Colormap applied at composite time; the default (grey) skips the pass.
    pub colormap: &'static RgbColorMap,
    pub bias: BiasKind,
    /// Draw full segments including overscan instead of cropping to datasec.
    pub show_bias_region: bool,
    /// Suffix selecting which WCS keyword family places the segments.
    pub wcs_letter: char,
    pub scale: ScaleMode,
    /// Precomputed global scale; when absent and `scale` is `Global`, the
    /// reader computes one on the fly.
    pub global_scale: Option<GlobalScale>,
    pub wcs_override: Option<Arc<WcsOverride>>,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            source_region: None,
            colormap: default_color_map(),
            bias: BiasKind::None,
            show_bias_region: false,
            wcs_letter: 'E',
            scale: ScaleMode::Amplifier,
            global_scale: None,
            wcs_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_scale_identity_semantics() {
        let bins = Arc::new(vec![0u64; 8]);
        let a = GlobalScale::new(bins.clone());
        let b = a.clone();
        let c = GlobalScale::new(Arc::new(vec![0u64; 8]));

        assert_eq!(a, b);
        assert_ne!(a, c); // equal content, different array
    }

    #[test]
    fn test_defaults() {
        let params = RenderParams::default();
        assert!(params.source_region.is_none());
        assert!(params.colormap.is_default());
        assert_eq!(params.bias, BiasKind::None);
        assert_eq!(params.scale, ScaleMode::Amplifier);
        assert_eq!(params.wcs_letter, 'E');
    }
}
