//! Asynchronous Single-Flight Cache
//!
//! The building block of the render fabric. Every cache is a mapping from a key
//! to a shared future of a value with four guarantees:
//!
//! 1. **Single flight**: concurrent `get`s of one key run the loader once;
//!    every caller awaits the same shared future until the entry is evicted.
//! 2. **Asynchrony**: `get` never blocks the caller; the critical section is a
//!    map lookup, and the load itself runs as an awaited future.
//! 3. **Eviction**: least-recently-used, capped either by entry count or by a
//!    byte weight read from each value. Evicting drops the entry, nothing else.
//! 4. **Failure transparency**: a failed load is handed to every current
//!    waiter and then forgotten, so the next `get` retries instead of replaying
//!    a cached error.
//!
//! Values are handed out as `Arc<V>`: publication is single-producer (the
//! loader) and everything downstream reads shared, immutable data.
//!
//! ## Completion races
//!
//! A pending entry can be evicted, or even replaced by a newer load, while its
//! loader still runs. Each in-flight load therefore carries a ticket; the
//! completion only installs its value when the slot still holds the same
//! ticket. Losing the race just means the loaded value goes uncached; the
//! waiters already hold it.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;

use focaltile_core::{Result, SharedResult};

use crate::stats::{CacheStats, StatsSnapshot};

type Loader<K, V> = dyn Fn(K) -> BoxFuture<'static, Result<V>> + Send + Sync;
type LoadFuture<V> = Shared<BoxFuture<'static, SharedResult<Arc<V>>>>;
type Weigher<V> = dyn Fn(&V) -> u64 + Send + Sync;

enum Capacity<V> {
    Entries(u64),
    Weight { max_bytes: u64, weigher: Box<Weigher<V>> },
}

enum Slot<V> {
    Pending { ticket: u64, future: LoadFuture<V> },
    Ready { value: Arc<V>, weight: u64 },
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, Slot<V>>,
    weight: u64,
}

struct SharedState<K: Hash + Eq, V> {
    name: &'static str,
    inner: Mutex<Inner<K, V>>,
    capacity: Capacity<V>,
    loader: Box<Loader<K, V>>,
    stats: Arc<CacheStats>,
    next_ticket: AtomicU64,
}

/// An asynchronous LRU cache with per-key single-flight loading.
pub struct AsyncCache<K: Hash + Eq, V> {
    state: Arc<SharedState<K, V>>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Entry-count-capped cache.
    pub fn with_max_entries(
        name: &'static str,
        max_entries: u64,
        loader: impl Fn(K) -> BoxFuture<'static, Result<V>> + Send + Sync + 'static,
    ) -> Self {
        Self::build(name, Capacity::Entries(max_entries), Box::new(loader))
    }

    /// Byte-weight-capped cache; `weigher` reads a value's resident size.
    pub fn with_max_weight(
        name: &'static str,
        max_bytes: u64,
        weigher: impl Fn(&V) -> u64 + Send + Sync + 'static,
        loader: impl Fn(K) -> BoxFuture<'static, Result<V>> + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            name,
            Capacity::Weight {
                max_bytes,
                weigher: Box::new(weigher),
            },
            Box::new(loader),
        )
    }

    fn build(name: &'static str, capacity: Capacity<V>, loader: Box<Loader<K, V>>) -> Self {
        Self {
            state: Arc::new(SharedState {
                name,
                inner: Mutex::new(Inner {
                    entries: LruCache::unbounded(),
                    weight: 0,
                }),
                capacity,
                loader,
                stats: Arc::new(CacheStats::default()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch or load the value for `key`.
    ///
    /// The returned future resolves when the (possibly already in-flight) load
    /// completes. Failures are shared with every concurrent waiter.
    pub fn get(&self, key: K) -> impl Future<Output = SharedResult<Arc<V>>> + Send + 'static {
        let future = self.entry_future(key);
        async move { future.await }
    }

    fn entry_future(&self, key: K) -> LoadFuture<V> {
        let state = &self.state;
        let mut inner = state.inner.lock().expect("cache lock");

        if let Some(slot) = inner.entries.get(&key) {
            state.stats.record_hit();
            return match slot {
                Slot::Ready { value, .. } => {
                    let value = value.clone();
                    async move { Ok(value) }.boxed().shared()
                }
                Slot::Pending { future, .. } => future.clone(),
            };
        }

        state.stats.record_miss();
        let ticket = state.next_ticket.fetch_add(1, Ordering::Relaxed);
        let future = Self::spawn_load(state.clone(), key.clone(), ticket);
        inner.entries.push(
            key,
            Slot::Pending {
                ticket,
                future: future.clone(),
            },
        );
        future
    }

    fn spawn_load(state: Arc<SharedState<K, V>>, key: K, ticket: u64) -> LoadFuture<V> {
        async move {
            let started = Instant::now();
            let loaded = (state.loader)(key.clone()).await;
            state.stats.record_load(started.elapsed(), loaded.is_err());

            match loaded {
                Ok(value) => {
                    let value = Arc::new(value);
                    state.complete(&key, ticket, value.clone());
                    Ok(value)
                }
                Err(e) => {
                    state.forget(&key, ticket);
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Resident entry count (ready and in-flight).
    pub fn len(&self) -> u64 {
        self.state.inner.lock().expect("cache lock").entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total weight of ready entries; zero for count-capped caches.
    pub fn weight_bytes(&self) -> u64 {
        self.state.inner.lock().expect("cache lock").weight
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.state.stats.clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.snapshot()
    }

    /// Handle for the periodic stats reporter.
    pub fn report_handle(&self) -> Arc<dyn ReportableCache> {
        Arc::new(ReportHandle {
            state: self.state.clone(),
        })
    }
}

impl<K: Hash + Eq + Clone, V> SharedState<K, V> {
    fn snapshot(&self) -> StatsSnapshot {
        let (entries, weight_bytes) = {
            let inner = self.inner.lock().expect("cache lock");
            (inner.entries.len() as u64, inner.weight)
        };
        let load_count = self.stats.load_count();
        StatsSnapshot {
            name: self.name,
            entries,
            weight_bytes,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            load_count,
            load_failures: self.stats.load_failures(),
            mean_load: if load_count == 0 {
                std::time::Duration::ZERO
            } else {
                self.stats.total_load_time() / load_count as u32
            },
        }
    }

    /// Install a loaded value, then trim to capacity.
    fn complete(&self, key: &K, ticket: u64, value: Arc<V>) {
        let mut inner = self.inner.lock().expect("cache lock");

        let still_ours = matches!(
            inner.entries.peek(key),
            Some(Slot::Pending { ticket: t, .. }) if *t == ticket
        );
        if !still_ours {
            return;
        }

        let weight = match &self.capacity {
            Capacity::Entries(_) => 0,
            Capacity::Weight { weigher, .. } => weigher(&value),
        };
        inner.entries.put(key.clone(), Slot::Ready { value, weight });
        inner.weight += weight;
        self.trim(&mut inner);
    }

    /// Drop a failed load so the error is not served to later callers.
    fn forget(&self, key: &K, ticket: u64) {
        let mut inner = self.inner.lock().expect("cache lock");
        let still_ours = matches!(
            inner.entries.peek(key),
            Some(Slot::Pending { ticket: t, .. }) if *t == ticket
        );
        if still_ours {
            inner.entries.pop(key);
        }
    }

    fn trim(&self, inner: &mut Inner<K, V>) {
        loop {
            let over = match &self.capacity {
                Capacity::Entries(max) => inner.entries.len() as u64 > *max,
                Capacity::Weight { max_bytes, .. } => inner.weight > *max_bytes,
            };
            if !over {
                return;
            }
            match inner.entries.pop_lru() {
                Some((_, Slot::Ready { weight, .. })) => {
                    inner.weight -= weight;
                    self.stats.record_eviction();
                }
                Some((_, Slot::Pending { .. })) => {
                    self.stats.record_eviction();
                }
                None => return,
            }
        }
    }
}

impl<K: Hash + Eq + Clone, V> Clone for AsyncCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

/// Type-erased view of one cache for the stats reporter.
pub trait ReportableCache: Send + Sync {
    fn snapshot(&self) -> StatsSnapshot;
}

struct ReportHandle<K: Hash + Eq, V> {
    state: Arc<SharedState<K, V>>,
}

impl<K, V> ReportableCache for ReportHandle<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn snapshot(&self) -> StatsSnapshot {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focaltile_core::Error;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_cache(
        max_entries: u64,
        loads: Arc<AtomicUsize>,
    ) -> AsyncCache<u32, u32> {
        AsyncCache::with_max_entries("test", max_entries, move |key: u32| {
            let loads = loads.clone();
            async move {
                loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(key * 2)
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_loads_and_returns_value() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, loads.clone());

        assert_eq!(*cache.get(21).await.unwrap(), 42);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_under_contention() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, loads.clone());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(7).await }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), 14);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hit_after_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, loads.clone());

        cache.get(1).await.unwrap();
        cache.get(1).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
    }

    #[tokio::test]
    async fn test_failed_loads_are_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let cache: AsyncCache<u32, u32> = {
            let attempts = attempts.clone();
            AsyncCache::with_max_entries("flaky", 10, move |key: u32| {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Io("first attempt fails".to_string()))
                    } else {
                        Ok(key)
                    }
                }
                .boxed()
            })
        };

        assert!(cache.get(5).await.is_err());
        assert_eq!(*cache.get(5).await.unwrap(), 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_count_eviction_is_lru() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(2, loads.clone());

        cache.get(1).await.unwrap();
        cache.get(2).await.unwrap();
        cache.get(1).await.unwrap(); // refresh 1
        cache.get(3).await.unwrap(); // evicts 2

        let before = loads.load(Ordering::SeqCst);
        cache.get(1).await.unwrap(); // still resident
        assert_eq!(loads.load(Ordering::SeqCst), before);
        cache.get(2).await.unwrap(); // reloaded
        assert_eq!(loads.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_weight_cap_holds() {
        let cache: AsyncCache<u32, Vec<u8>> = AsyncCache::with_max_weight(
            "weighted",
            1000,
            |v: &Vec<u8>| v.len() as u64,
            |_key: u32| async move { Ok(vec![0u8; 400]) }.boxed(),
        );

        for key in 0..8 {
            cache.get(key).await.unwrap();
        }
        assert!(cache.weight_bytes() <= 1000);
        assert!(cache.snapshot().evictions >= 6);
    }

    #[tokio::test]
    async fn test_oversized_entry_does_not_wedge() {
        let cache: AsyncCache<u32, Vec<u8>> = AsyncCache::with_max_weight(
            "tiny",
            100,
            |v: &Vec<u8>| v.len() as u64,
            |_key: u32| async move { Ok(vec![0u8; 400]) }.boxed(),
        );

        // the value is served even though it can never stay cached
        assert_eq!(cache.get(1).await.unwrap().len(), 400);
        assert_eq!(cache.weight_bytes(), 0);
    }

    #[tokio::test]
    async fn test_get_is_nonblocking() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, loads.clone());

        // obtaining the future does not run the loader
        let pending = cache.get(9);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(*pending.await.unwrap(), 18);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_break_others() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(10, loads.clone());

        let abandoned = cache.get(4);
        drop(abandoned);
        assert_eq!(*cache.get(4).await.unwrap(), 8);
    }
}
