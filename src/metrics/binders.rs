//! Pool, cache and dispatcher gauges
//!
//! Each binder registers gauges under `<prefix>.pool` that re-read a live
//! object on every scrape. Nothing is cached between reads.

use super::{MeterRegistry, Tags, names};
use std::sync::Arc;

/// Something that registers its meters into a registry
pub trait MeterBinder {
    fn bind_to(&self, registry: &MeterRegistry) -> prometheus::Result<()>;
}

/// Live view of a call dispatcher
pub trait DispatcherStats: Send + Sync + 'static {
    fn max_requests(&self) -> usize;
    fn max_requests_per_host(&self) -> usize;
    fn queued_calls_count(&self) -> usize;
    fn running_calls_count(&self) -> usize;
}

/// Live view of a response cache owned by the host application
pub trait CacheStats: Send + Sync + 'static {
    fn request_count(&self) -> u64;
    fn hit_count(&self) -> u64;
    fn network_count(&self) -> u64;
    fn write_success_count(&self) -> u64;
    fn write_abort_count(&self) -> u64;
    /// Current size in bytes; the read may touch storage
    fn size(&self) -> std::io::Result<u64>;
    fn max_size(&self) -> u64;
}

/// Live view of transport connections opened by the client
pub trait ConnectionPoolStats: Send + Sync + 'static {
    fn opened(&self) -> u64;
    fn failed(&self) -> u64;
    /// Configured cap on idle connections kept per host
    fn limit(&self) -> usize;
}

/// Dispatcher limits and queue depths
pub struct DispatcherMetrics {
    stats: Arc<dyn DispatcherStats>,
    prefix: String,
    tags: Tags,
}

impl DispatcherMetrics {
    pub fn new(stats: Arc<dyn DispatcherStats>, prefix: &str, tags: Tags) -> Self {
        Self {
            stats,
            prefix: names::pool_prefix(prefix),
            tags,
        }
    }
}

impl MeterBinder for DispatcherMetrics {
    fn bind_to(&self, registry: &MeterRegistry) -> prometheus::Result<()> {
        let stats = Arc::clone(&self.stats);
        registry.function_counter(
            &names::join(&self.prefix, names::DISPATCHER_MAX_REQUESTS),
            &self.tags,
            move || stats.max_requests() as f64,
        )?;

        let stats = Arc::clone(&self.stats);
        registry.function_counter(
            &names::join(&self.prefix, names::DISPATCHER_MAX_REQUESTS_PERHOST),
            &self.tags,
            move || stats.max_requests_per_host() as f64,
        )?;

        let stats = Arc::clone(&self.stats);
        registry.gauge(
            &names::join(&self.prefix, names::DISPATCHER_QUEUED_CALLS_COUNT),
            &self.tags,
            move || stats.queued_calls_count() as f64,
        )?;

        let stats = Arc::clone(&self.stats);
        registry.gauge(
            &names::join(&self.prefix, names::DISPATCHER_RUNNING_CALLS_COUNT),
            &self.tags,
            move || stats.running_calls_count() as f64,
        )?;

        tracing::debug!(prefix = %self.prefix, "Bound dispatcher metrics");
        Ok(())
    }
}

/// Response cache counters and sizes
pub struct CacheMetrics {
    cache: Arc<dyn CacheStats>,
    prefix: String,
    tags: Tags,
}

impl CacheMetrics {
    pub fn new(cache: Arc<dyn CacheStats>, prefix: &str, tags: Tags) -> Self {
        Self {
            cache,
            prefix: names::pool_prefix(prefix),
            tags,
        }
    }
}

impl MeterBinder for CacheMetrics {
    fn bind_to(&self, registry: &MeterRegistry) -> prometheus::Result<()> {
        let counts: [(&str, fn(&dyn CacheStats) -> u64); 5] = [
            (names::CACHE_REQUEST_COUNT, |c| c.request_count()),
            (names::CACHE_HIT_COUNT, |c| c.hit_count()),
            (names::CACHE_NETWORK_COUNT, |c| c.network_count()),
            (names::CACHE_WRITE_SUCCESS_COUNT, |c| c.write_success_count()),
            (names::CACHE_WRITE_ABORT_COUNT, |c| c.write_abort_count()),
        ];

        for (suffix, read) in counts {
            let cache = Arc::clone(&self.cache);
            registry.gauge(
                &names::join(&self.prefix, suffix),
                &self.tags,
                move || read(cache.as_ref()) as f64,
            )?;
        }

        let cache = Arc::clone(&self.cache);
        registry.gauge(
            &names::join(&self.prefix, names::CACHE_CURRENT_SIZE),
            &self.tags,
            move || match cache.size() {
                Ok(size) => size as f64,
                Err(e) => {
                    tracing::debug!(error = %e, "Cache size unavailable, reporting 0");
                    0.0
                }
            },
        )?;

        let cache = Arc::clone(&self.cache);
        registry.gauge(
            &names::join(&self.prefix, names::CACHE_MAX_SIZE),
            &self.tags,
            move || cache.max_size() as f64,
        )?;

        tracing::debug!(prefix = %self.prefix, "Bound cache metrics");
        Ok(())
    }
}

/// Connection open/failure totals and the idle-per-host limit
pub struct ConnectionPoolMetrics {
    pool: Arc<dyn ConnectionPoolStats>,
    prefix: String,
    tags: Tags,
}

impl ConnectionPoolMetrics {
    pub fn new(pool: Arc<dyn ConnectionPoolStats>, prefix: &str, tags: Tags) -> Self {
        Self {
            pool,
            prefix: names::pool_prefix(prefix),
            tags,
        }
    }
}

impl MeterBinder for ConnectionPoolMetrics {
    fn bind_to(&self, registry: &MeterRegistry) -> prometheus::Result<()> {
        let pool = Arc::clone(&self.pool);
        registry.function_counter(
            &names::join(&self.prefix, names::POOL_CONNECTION_OPENED),
            &self.tags,
            move || pool.opened() as f64,
        )?;

        let pool = Arc::clone(&self.pool);
        registry.function_counter(
            &names::join(&self.prefix, names::POOL_CONNECTION_FAILED),
            &self.tags,
            move || pool.failed() as f64,
        )?;

        let pool = Arc::clone(&self.pool);
        registry.gauge(
            &names::join(&self.prefix, names::POOL_CONNECTION_LIMIT),
            &self.tags,
            move || pool.limit() as f64,
        )?;

        Ok(())
    }
}
