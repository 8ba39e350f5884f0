pub mod cache;
pub mod reporter;
pub mod stats;

pub use cache::{AsyncCache, ReportableCache};
pub use reporter::{spawn_stats_reporter, REPORT_INTERVAL};
pub use stats::{CacheStats, StatsSnapshot};
