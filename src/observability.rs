//! Metrics collection for cache operations.
//!
//! Two layers:
//!
//! - **Hooks (`CacheMetrics`)**: per-event callbacks the application can
//!   implement to forward events to Prometheus, StatsD, etc.
//! - **Built-in counters (`CacheStats`)**: always-on hit/miss/write/
//!   invalidation/error counters and a rolling response-time average,
//!   read through [`CacheStats::snapshot`].
//!
//! ```ignore
//! use resilient_cache::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("cache_hits").inc();
//!     }
//! }
//!
//! let engine = CacheEngine::new(backend, config)
//!     .with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! Default behavior (if not overridden) uses `NoOpMetrics`.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of response-time samples kept for the rolling average.
pub const DEFAULT_RESPONSE_SAMPLES: usize = 100;

/// Trait for cache metrics hooks.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a cache set operation.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record invalidated keys.
    fn record_invalidation(&self, key: &str, removed: u64) {
        debug!("Cache INVALIDATE: {} ({} keys)", key, removed);
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_invalidation(&self, _key: &str, _removed: u64) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Point-in-time view of the engine's counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub errors: u64,
    /// `hits / (hits + misses)`, 0.0 when nothing was read yet.
    pub hit_ratio: f64,
    /// Mean over the last N recorded operations.
    pub avg_response_time: Duration,
    pub samples: usize,
}

/// Lock-free counters plus a bounded ring buffer of response times.
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
    response_times: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl CacheStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        CacheStats {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.sample(elapsed);
    }

    pub fn miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.sample(elapsed);
    }

    pub fn write(&self, elapsed: Duration) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.sample(elapsed);
    }

    pub fn invalidated(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn sample(&self, elapsed: Duration) {
        let mut samples = self.response_times.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = hits + misses;

        let (avg_response_time, samples) = {
            let samples = self.response_times.lock();
            let total: Duration = samples.iter().sum();
            let avg = if samples.is_empty() {
                Duration::ZERO
            } else {
                total / samples.len() as u32
            };
            (avg, samples.len())
        };

        CacheMetricsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_ratio: if reads == 0 {
                0.0
            } else {
                hits as f64 / reads as f64
            },
            avg_response_time,
            samples,
        }
    }

    /// Zero every counter and drop all samples.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.response_times.lock().clear();
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_hit("key", Duration::from_secs(1));
        metrics.record_miss("key", Duration::from_secs(2));
        metrics.record_invalidation("key", 3);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats::default();
        stats.hit(Duration::from_millis(1));
        stats.hit(Duration::from_millis(1));
        stats.hit(Duration::from_millis(1));
        stats.miss(Duration::from_millis(1));

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_ratio - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = CacheStats::default().snapshot();
        assert_eq!(snap, CacheMetricsSnapshot::default());
    }

    #[test]
    fn test_ring_buffer_keeps_last_samples() {
        let stats = CacheStats::new(3);
        stats.write(Duration::from_millis(100));
        stats.write(Duration::from_millis(10));
        stats.write(Duration::from_millis(10));
        stats.write(Duration::from_millis(10));

        let snap = stats.snapshot();
        assert_eq!(snap.samples, 3);
        assert_eq!(snap.avg_response_time, Duration::from_millis(10));
        assert_eq!(snap.writes, 4);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::default();
        stats.error();
        stats.invalidated(4);
        stats.reset();
        assert_eq!(stats.snapshot(), CacheMetricsSnapshot::default());
    }
}
