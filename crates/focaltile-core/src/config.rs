//! Reader Configuration
//!
//! Process-wide cache sizing knobs. Each knob has a documented default and an
//! environment-variable override (`FOCALTILE_<NAME>` in shouting snake case).
//! The configuration is read once when a reader is constructed and snapshotted;
//! runtime reconfiguration is deliberately unsupported.
//!
//! | Option | Effect | Default |
//! |---|---|---|
//! | `lines_cache_size` | max index-line cache entries | 10 000 |
//! | `segment_cache_size` | max segment-list cache entries | 10 000 |
//! | `raw_data_cache_size_bytes` | max decoded raw-pixel bytes | 1 000 000 000 |
//! | `bias_correction_cache_size` | max correction-factor entries | 10 000 |
//! | `buffered_image_cache_size_bytes` | max rendered-tile bytes | 5 000 000 000 |
//! | `global_scaling_cache_size` | max global-histogram entries | 10 000 |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Maximum number of cached index-line lists (default: 10 000)
    #[serde(default = "default_count_cap")]
    pub lines_cache_size: u64,

    /// Maximum number of cached segment lists (default: 10 000)
    #[serde(default = "default_count_cap")]
    pub segment_cache_size: u64,

    /// Maximum total bytes of decoded raw pixel data (default: 1 GB)
    #[serde(default = "default_raw_data_bytes")]
    pub raw_data_cache_size_bytes: u64,

    /// Maximum number of cached bias-correction factor sets (default: 10 000)
    #[serde(default = "default_count_cap")]
    pub bias_correction_cache_size: u64,

    /// Maximum total bytes of rendered tiles (default: 5 GB)
    #[serde(default = "default_buffered_image_bytes")]
    pub buffered_image_cache_size_bytes: u64,

    /// Maximum number of cached global histograms (default: 10 000)
    #[serde(default = "default_count_cap")]
    pub global_scaling_cache_size: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            lines_cache_size: default_count_cap(),
            segment_cache_size: default_count_cap(),
            raw_data_cache_size_bytes: default_raw_data_bytes(),
            bias_correction_cache_size: default_count_cap(),
            buffered_image_cache_size_bytes: default_buffered_image_bytes(),
            global_scaling_cache_size: default_count_cap(),
        }
    }
}

impl ReaderConfig {
    /// Defaults overlaid with any `FOCALTILE_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning rather than failing the
    /// process; a viewer with a default-sized cache beats no viewer at all.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        override_from_env("FOCALTILE_LINES_CACHE_SIZE", &mut config.lines_cache_size);
        override_from_env(
            "FOCALTILE_SEGMENT_CACHE_SIZE",
            &mut config.segment_cache_size,
        );
        override_from_env(
            "FOCALTILE_RAW_DATA_CACHE_SIZE_BYTES",
            &mut config.raw_data_cache_size_bytes,
        );
        override_from_env(
            "FOCALTILE_BIAS_CORRECTION_CACHE_SIZE",
            &mut config.bias_correction_cache_size,
        );
        override_from_env(
            "FOCALTILE_BUFFERED_IMAGE_CACHE_SIZE_BYTES",
            &mut config.buffered_image_cache_size_bytes,
        );
        override_from_env(
            "FOCALTILE_GLOBAL_SCALING_CACHE_SIZE",
            &mut config.global_scaling_cache_size,
        );
        config
    }
}

fn override_from_env(name: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(name, raw = %raw, "ignoring unparseable cache size"),
        }
    }
}

fn default_count_cap() -> u64 {
    10_000
}

fn default_raw_data_bytes() -> u64 {
    1_000_000_000
}

fn default_buffered_image_bytes() -> u64 {
    5_000_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_table() {
        let c = ReaderConfig::default();
        assert_eq!(c.lines_cache_size, 10_000);
        assert_eq!(c.segment_cache_size, 10_000);
        assert_eq!(c.raw_data_cache_size_bytes, 1_000_000_000);
        assert_eq!(c.bias_correction_cache_size, 10_000);
        assert_eq!(c.buffered_image_cache_size_bytes, 5_000_000_000);
        assert_eq!(c.global_scaling_cache_size, 10_000);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("FOCALTILE_RAW_DATA_CACHE_SIZE_BYTES", "123456");
        let c = ReaderConfig::from_env();
        std::env::remove_var("FOCALTILE_RAW_DATA_CACHE_SIZE_BYTES");
        assert_eq!(c.raw_data_cache_size_bytes, 123_456);
        assert_eq!(c.segment_cache_size, 10_000);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        std::env::set_var("FOCALTILE_LINES_CACHE_SIZE", "a lot");
        let c = ReaderConfig::from_env();
        std::env::remove_var("FOCALTILE_LINES_CACHE_SIZE");
        assert_eq!(c.lines_cache_size, 10_000);
    }
}
