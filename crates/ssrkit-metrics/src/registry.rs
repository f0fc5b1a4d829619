use crate::snapshot::{CacheMetrics, FragmentMetrics, MetricsSnapshot, PoolMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Instant, SystemTime};

/// Ten bins per decade from 1us up to 10^10us.
const NUM_HISTOGRAM_BINS: usize = 100;

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the epoch, strictly increasing across calls.
///
/// Two calls in the same millisecond still get distinct values, which keeps
/// least-recently-used ordering total. A clock set before the epoch falls
/// back to the counter alone.
pub fn monotonic_timestamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    loop {
        let last = LAST_TIMESTAMP.load(Ordering::Acquire);
        let next = now.max(last + 1);
        if LAST_TIMESTAMP
            .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
        {
            return next;
        }
    }
}

/// Limits on how many fragments are tracked.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Fragments tracked before the least recently rendered are dropped
    pub max_fragments: usize,
    /// Fragments idle longer than this are dropped during cleanup
    pub fragment_ttl_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_fragments: 1000,
            fragment_ttl_secs: 3600,
        }
    }
}

/// Log-scale latency histogram.
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.bins[Self::bin_for(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bin index is decade * 10 + leading digit.
    fn bin_for(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10();
        let leading = latency_us / 10u64.pow(decade);
        ((decade as usize) * 10 + leading as usize).min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Lower bound of a bin.
    fn bin_floor(bin: usize) -> u64 {
        let decade = (bin / 10) as u32;
        let leading = (bin % 10).max(1) as u64;
        10u64.saturating_pow(decade).saturating_mul(leading)
    }

    fn percentile(&self, pct: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let target = ((total * pct) / 100).max(1);
        let mut seen = 0;
        for (idx, bin) in self.bins.iter().enumerate() {
            let count = bin.load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            if seen + count >= target {
                let lo = Self::bin_floor(idx) as f64;
                let hi = Self::bin_floor(idx + 1) as f64;
                let fraction = (target - seen) as f64 / count as f64;
                return (lo + fraction * (hi - lo)) as u64;
            }
            seen += count;
        }
        Self::bin_floor(NUM_HISTOGRAM_BINS - 1)
    }

    /// (avg, p50, p95, p99) in microseconds
    fn summary(&self) -> (u64, u64, u64, u64) {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return (0, 0, 0, 0);
        }
        let avg = self.total_latency.load(Ordering::Relaxed) / total;
        (avg, self.percentile(50), self.percentile(95), self.percentile(99))
    }
}

struct FragmentStats {
    render_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: LatencyHistogram,
    last_access_ms: AtomicU64,
}

impl FragmentStats {
    fn new() -> Self {
        Self {
            render_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            last_access_ms: AtomicU64::new(monotonic_timestamp()),
        }
    }

    fn record(&self, latency_us: u64, success: bool) {
        self.render_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.latencies.record(latency_us);
        self.last_access_ms.store(monotonic_timestamp(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> FragmentMetrics {
        let (avg, p50, p95, p99) = self.latencies.summary();
        FragmentMetrics {
            render_count: self.render_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_latency_us: avg,
            p50_latency_us: p50,
            p95_latency_us: p95,
            p99_latency_us: p99,
        }
    }
}

/// Thread-safe metrics storage.
///
/// Counters are relaxed atomics; the fragment map sits behind an `RwLock`
/// that is only write-locked the first time a fragment is seen and during
/// cleanup.
pub struct MetricsRegistry {
    total_renders: AtomicU64,
    successful_renders: AtomicU64,
    failed_renders: AtomicU64,
    active_connections: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_saves: AtomicU64,
    cache_evicted: AtomicU64,
    engines_recycled: AtomicU64,
    pool_rebuilds: AtomicU64,
    hmr_events: AtomicU64,
    fragments: StdRwLock<HashMap<String, Arc<FragmentStats>>>,
    operations: AtomicU64,
    config: MetricsConfig,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            total_renders: AtomicU64::new(0),
            successful_renders: AtomicU64::new(0),
            failed_renders: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_saves: AtomicU64::new(0),
            cache_evicted: AtomicU64::new(0),
            engines_recycled: AtomicU64::new(0),
            pool_rebuilds: AtomicU64::new(0),
            hmr_events: AtomicU64::new(0),
            fragments: StdRwLock::new(HashMap::new()),
            operations: AtomicU64::new(0),
            config,
            start_time: Instant::now(),
        }
    }

    pub fn record_render(&self, fragment: &str, latency_us: u64, success: bool) {
        self.total_renders.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_renders.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_renders.fetch_add(1, Ordering::Relaxed);
        }

        let existing = self
            .fragments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(fragment)
            .cloned();
        let stats = match existing {
            Some(stats) => stats,
            None => {
                let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());
                fragments
                    .entry(fragment.to_string())
                    .or_insert_with(|| Arc::new(FragmentStats::new()))
                    .clone()
            }
        };
        stats.record(latency_us, success);

        self.maybe_cleanup();
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_save(&self) {
        self.cache_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cache_evicted(&self, count: u64) {
        self.cache_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_engines_recycled(&self) {
        self.engines_recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pool_rebuilds(&self) {
        self.pool_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_hmr_events(&self) {
        self.hmr_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Runs cleanup every 1000 recorded renders.
    fn maybe_cleanup(&self) {
        const CLEANUP_INTERVAL: u64 = 1000;
        if self.operations.fetch_add(1, Ordering::Relaxed) % CLEANUP_INTERVAL == CLEANUP_INTERVAL - 1 {
            self.cleanup_stale_entries();
        }
    }

    /// Drops fragments idle past the TTL, then the least recently rendered
    /// ones until the map is within `max_fragments`.
    fn cleanup_stale_entries(&self) {
        let now = monotonic_timestamp();
        let ttl_ms = self.config.fragment_ttl_secs.saturating_mul(1000);
        let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());

        fragments.retain(|_, stats| {
            now.saturating_sub(stats.last_access_ms.load(Ordering::Relaxed)) <= ttl_ms
        });

        if fragments.len() > self.config.max_fragments {
            let mut by_age: Vec<(String, u64)> = fragments
                .iter()
                .map(|(name, stats)| (name.clone(), stats.last_access_ms.load(Ordering::Relaxed)))
                .collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = fragments.len() - self.config.max_fragments;
            for (name, _) in by_age.into_iter().take(excess) {
                fragments.remove(&name);
            }
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::new(self.uptime_ms());
        snapshot.total_renders = self.total_renders.load(Ordering::Relaxed);
        snapshot.successful_renders = self.successful_renders.load(Ordering::Relaxed);
        snapshot.failed_renders = self.failed_renders.load(Ordering::Relaxed);
        snapshot.active_connections = self.active_connections.load(Ordering::Relaxed);
        snapshot.cache = CacheMetrics {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            saves: self.cache_saves.load(Ordering::Relaxed),
            evicted: self.cache_evicted.load(Ordering::Relaxed),
        };
        snapshot.pool = PoolMetrics {
            engines_recycled: self.engines_recycled.load(Ordering::Relaxed),
            rebuilds: self.pool_rebuilds.load(Ordering::Relaxed),
        };
        snapshot.hmr_events = self.hmr_events.load(Ordering::Relaxed);

        let fragments = self.fragments.read().unwrap_or_else(|e| e.into_inner());
        for (name, stats) in fragments.iter() {
            snapshot.fragments.insert(name.clone(), stats.snapshot());
        }
        snapshot
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counters() {
        let registry = MetricsRegistry::new();
        registry.record_render("Home.js", 1200, true);
        registry.record_render("Home.js", 800, false);
        registry.record_render("About.js", 500, true);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_renders, 3);
        assert_eq!(snapshot.successful_renders, 2);
        assert_eq!(snapshot.failed_renders, 1);

        let home = &snapshot.fragments["Home.js"];
        assert_eq!(home.render_count, 2);
        assert_eq!(home.failure_count, 1);
        assert_eq!(home.avg_latency_us, 1000);
    }

    #[test]
    fn test_cache_and_pool_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_cache_hit();
        registry.increment_cache_hit();
        registry.increment_cache_miss();
        registry.increment_cache_save();
        registry.add_cache_evicted(4);
        registry.increment_engines_recycled();
        registry.increment_pool_rebuilds();
        registry.increment_hmr_events();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.cache.hits, 2);
        assert_eq!(snapshot.cache.misses, 1);
        assert_eq!(snapshot.cache.saves, 1);
        assert_eq!(snapshot.cache.evicted, 4);
        assert_eq!(snapshot.pool.engines_recycled, 1);
        assert_eq!(snapshot.pool.rebuilds, 1);
        assert_eq!(snapshot.hmr_events, 1);
    }

    #[test]
    fn test_active_connections_never_underflow() {
        let registry = MetricsRegistry::new();
        registry.decrement_active_connections();
        assert_eq!(registry.snapshot().active_connections, 0);

        registry.increment_active_connections();
        registry.increment_active_connections();
        registry.decrement_active_connections();
        assert_eq!(registry.snapshot().active_connections, 1);
    }

    #[test]
    fn test_monotonic_timestamp_strictly_increases() {
        let mut last = monotonic_timestamp();
        for _ in 0..1000 {
            let next = monotonic_timestamp();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_histogram_bins() {
        assert_eq!(LatencyHistogram::bin_for(0), 0);
        assert_eq!(LatencyHistogram::bin_for(7), 7);
        assert_eq!(LatencyHistogram::bin_for(35), 13);
        assert_eq!(LatencyHistogram::bin_for(1500), 31);
        assert_eq!(LatencyHistogram::bin_for(u64::MAX), NUM_HISTOGRAM_BINS - 1);
    }

    #[test]
    fn test_percentiles_ordered() {
        let histogram = LatencyHistogram::new();
        for latency in 1..=1000 {
            histogram.record(latency);
        }
        let (avg, p50, p95, p99) = histogram.summary();
        assert_eq!(avg, 500);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
        assert!(p50 > 100 && p50 < 1000);
    }

    #[test]
    fn test_cleanup_caps_fragment_count() {
        let registry = MetricsRegistry::with_config(MetricsConfig {
            max_fragments: 10,
            fragment_ttl_secs: 3600,
        });
        for i in 0..1000 {
            registry.record_render(&format!("Page{}.js", i % 50), 100, true);
        }
        assert!(registry.snapshot().fragments.len() <= 50);
        registry.cleanup_stale_entries();
        assert_eq!(registry.snapshot().fragments.len(), 10);
    }
}
