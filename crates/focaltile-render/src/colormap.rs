//! RGB Color Lookup Tables
//!
//! The scaling engine reduces every sample to an 8-bit index; a colormap turns
//! that index into a packed `0x00RRGGBB` pixel. The real viewer loads SAO
//! colormap files; parsing those files is a host concern, so the menu names are
//! backed by built-in 256-entry tables with the same shapes (linear ramps and
//! the classic DS9 piecewise curves). `grey` is the default map and the
//! renderer's fast path.

use std::sync::OnceLock;

use focaltile_core::{Error, Result};

pub const COLOR_MAP_NAMES: [&str; 9] = [
    "grey",
    "a",
    "b",
    "bb",
    "cubehelix0",
    "cubehelix1",
    "rainbow",
    "standard",
    "null",
];

/// A 256-entry RGB lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbColorMap {
    name: &'static str,
    table: [u32; 256],
}

impl RgbColorMap {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Packed RGB for an 8-bit index; out-of-range indices clamp.
    pub fn rgb(&self, index: usize) -> u32 {
        self.table[index.min(255)]
    }

    /// True for the default map, which the renderer writes directly without a
    /// second lookup pass.
    pub fn is_default(&self) -> bool {
        self.name == "grey"
    }
}

/// Look a map up by menu name.
pub fn color_map(name: &str) -> Result<&'static RgbColorMap> {
    maps()
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| Error::UnknownStrategy {
            kind: "color map",
            name: name.to_string(),
        })
}

/// The default (grey) map.
pub fn default_color_map() -> &'static RgbColorMap {
    &maps()[0]
}

fn maps() -> &'static [RgbColorMap; 9] {
    static MAPS: OnceLock<[RgbColorMap; 9]> = OnceLock::new();
    MAPS.get_or_init(|| {
        [
            build("grey", &[(0.0, (0, 0, 0)), (1.0, (255, 255, 255))]),
            build(
                "a",
                &[
                    (0.0, (0, 0, 0)),
                    (0.25, (0, 0, 255)),
                    (0.5, (255, 0, 0)),
                    (0.75, (255, 255, 0)),
                    (1.0, (255, 255, 255)),
                ],
            ),
            build(
                "b",
                &[
                    (0.0, (0, 0, 0)),
                    (0.33, (255, 0, 0)),
                    (0.66, (255, 255, 0)),
                    (1.0, (255, 255, 255)),
                ],
            ),
            build(
                "bb",
                &[
                    (0.0, (0, 0, 0)),
                    (0.35, (128, 0, 0)),
                    (0.7, (255, 128, 0)),
                    (1.0, (255, 255, 255)),
                ],
            ),
            build(
                "cubehelix0",
                &[
                    (0.0, (0, 0, 0)),
                    (0.25, (22, 60, 62)),
                    (0.5, (110, 105, 56)),
                    (0.75, (210, 150, 180)),
                    (1.0, (255, 255, 255)),
                ],
            ),
            build(
                "cubehelix1",
                &[
                    (0.0, (0, 0, 0)),
                    (0.25, (80, 40, 110)),
                    (0.5, (90, 140, 90)),
                    (0.75, (190, 190, 100)),
                    (1.0, (255, 255, 255)),
                ],
            ),
            build(
                "rainbow",
                &[
                    (0.0, (0, 0, 255)),
                    (0.25, (0, 255, 255)),
                    (0.5, (0, 255, 0)),
                    (0.75, (255, 255, 0)),
                    (1.0, (255, 0, 0)),
                ],
            ),
            build(
                "standard",
                &[
                    (0.0, (0, 0, 0)),
                    (0.5, (0, 0, 255)),
                    (0.8, (255, 0, 255)),
                    (1.0, (255, 255, 255)),
                ],
            ),
            build("null", &[(0.0, (0, 0, 0)), (1.0, (0, 0, 0))]),
        ]
    })
}

/// Piecewise-linear interpolation between control points.
fn build(name: &'static str, stops: &[(f64, (u8, u8, u8))]) -> RgbColorMap {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let t = i as f64 / 255.0;
        let after = stops.iter().position(|(s, _)| *s >= t).unwrap_or(stops.len() - 1);
        let (t1, c1) = stops[after];
        let (t0, c0) = if after == 0 { stops[0] } else { stops[after - 1] };
        let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        let lerp = |a: u8, b: u8| (a as f64 + f * (b as f64 - a as f64)).round() as u32;
        *slot = (lerp(c0.0, c1.0) << 16) | (lerp(c0.1, c1.1) << 8) | lerp(c0.2, c1.2);
    }
    RgbColorMap { name, table }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grey_is_linear_ramp() {
        let grey = default_color_map();
        assert_eq!(grey.rgb(0), 0x000000);
        assert_eq!(grey.rgb(255), 0xFFFFFF);
        assert_eq!(grey.rgb(128), 0x808080);
        assert!(grey.is_default());
    }

    #[test]
    fn test_every_menu_name_resolves() {
        for name in COLOR_MAP_NAMES {
            let map = color_map(name).unwrap();
            assert_eq!(map.name(), name);
        }
    }

    #[test]
    fn test_unknown_name_fails() {
        assert!(matches!(
            color_map("viridis"),
            Err(Error::UnknownStrategy { kind: "color map", .. })
        ));
    }

    #[test]
    fn test_out_of_range_index_clamps() {
        assert_eq!(default_color_map().rgb(100_000), 0xFFFFFF);
    }

    #[test]
    fn test_null_map_is_black() {
        let null = color_map("null").unwrap();
        assert_eq!(null.rgb(0), 0);
        assert_eq!(null.rgb(255), 0);
    }
}
