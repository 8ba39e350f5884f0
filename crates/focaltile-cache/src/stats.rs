//! Per-cache counters.
//!
//! Plain atomics, updated on the hot path without locks. A snapshot pairs the
//! counters with the entry count and weight read from the cache itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    load_count: AtomicU64,
    load_failures: AtomicU64,
    load_nanos: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, elapsed: Duration, failed: bool) {
        self.load_count.fetch_add(1, Ordering::Relaxed);
        self.load_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if failed {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::Relaxed)
    }

    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    pub fn total_load_time(&self) -> Duration {
        Duration::from_nanos(self.load_nanos.load(Ordering::Relaxed))
    }
}

/// One cache's counters at a point in time.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub name: &'static str,
    pub entries: u64,
    pub weight_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub load_count: u64,
    pub load_failures: u64,
    pub mean_load: Duration,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
