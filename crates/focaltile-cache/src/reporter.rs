//! Periodic cache statistics reporter.
//!
//! Logs every cache's snapshot once a minute, the cheap always-on visibility
//! that answers "why is panning slow" without attaching a profiler. The task
//! only reads atomics and logs; it can never interrupt a render.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cache::ReportableCache;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the reporter. Aborting the returned handle stops it.
pub fn spawn_stats_reporter(
    caches: Vec<Arc<dyn ReportableCache>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick
        loop {
            ticker.tick().await;
            for cache in &caches {
                let s = cache.snapshot();
                tracing::info!(
                    cache = s.name,
                    entries = s.entries,
                    weight_bytes = s.weight_bytes,
                    hits = s.hits,
                    misses = s.misses,
                    hit_rate = format!("{:.1}%", s.hit_rate() * 100.0),
                    evictions = s.evictions,
                    load_failures = s.load_failures,
                    mean_load_ms = s.mean_load.as_millis() as u64,
                    "cache stats"
                );
            }
        }
    })
}
