//! Timers and distribution summaries
//!
//! Both are backed by a Prometheus histogram (count, sum, cumulative
//! buckets) plus an atomically maintained max. Percentiles are estimated
//! from the cumulative buckets the same way `histogram_quantile` does:
//! find the bucket holding the requested rank and interpolate linearly
//! inside it. Estimates never exceed the observed max.
//!
//! Every statistic here is cumulative over the life of the process, like
//! the Prometheus histogram underneath. The max is a lifetime max and does
//! not decay; windowed maxima belong in the scraping backend
//! (`max_over_time`).

use prometheus::Histogram;
use prometheus::core::Collector;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Percentiles published for request durations (median through 99.9th).
pub const DEFAULT_PERCENTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.98, 0.99, 0.999];

/// Duration bucket bounds in seconds: 1ms to 10s with a 100ms boundary.
pub const DEFAULT_DURATION_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Byte-count bucket bounds: 64B to 16MiB in powers of four.
pub const DEFAULT_BYTE_BUCKETS: [f64; 10] = [
    64.0,
    256.0,
    1024.0,
    4096.0,
    16384.0,
    65536.0,
    262144.0,
    1048576.0,
    4194304.0,
    16777216.0,
];

/// Bucket bounds and published percentiles for a timer or summary
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionConfig {
    buckets: Vec<f64>,
    percentiles: Vec<f64>,
}

impl DistributionConfig {
    /// Create a config from explicit bucket bounds and percentiles
    ///
    /// Bounds are used as given; `Config::validate` checks user-supplied
    /// values before they reach this point.
    pub fn new(buckets: Vec<f64>, percentiles: Vec<f64>) -> Self {
        Self {
            buckets,
            percentiles,
        }
    }

    /// Defaults for request and phase durations (seconds)
    pub fn durations() -> Self {
        Self::new(
            DEFAULT_DURATION_BUCKETS.to_vec(),
            DEFAULT_PERCENTILES.to_vec(),
        )
    }

    /// Defaults for body sizes (bytes)
    pub fn bytes() -> Self {
        Self::new(DEFAULT_BYTE_BUCKETS.to_vec(), DEFAULT_PERCENTILES.to_vec())
    }

    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self::durations()
    }
}

/// Point-in-time view of a distribution taken from a single collect
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub max: f64,
    /// `(upper bound, cumulative count)` per configured bucket
    pub buckets: Vec<(f64, u64)>,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Estimate the value at quantile `q` (0.0..=1.0)
    pub fn percentile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        let rank = q.clamp(0.0, 1.0) * self.count as f64;
        let mut lower_bound = 0.0;
        let mut lower_count = 0u64;

        for &(upper_bound, cumulative) in &self.buckets {
            if cumulative > lower_count && cumulative as f64 >= rank {
                if !upper_bound.is_finite() {
                    return self.max;
                }
                let in_bucket = (cumulative - lower_count) as f64;
                let fraction = (rank - lower_count as f64) / in_bucket;
                let estimate = lower_bound + (upper_bound - lower_bound) * fraction;
                return estimate.min(self.max);
            }
            lower_bound = upper_bound;
            lower_count = cumulative;
        }

        // Rank falls in the implicit +Inf bucket
        self.max
    }
}

/// Shared state behind timers and summaries
#[derive(Clone, Debug)]
pub struct Distribution {
    histogram: Histogram,
    max: Arc<AtomicU64>,
    percentiles: Arc<[f64]>,
}

impl Distribution {
    pub(crate) fn new(histogram: Histogram, percentiles: &[f64]) -> Self {
        Self {
            histogram,
            max: Arc::new(AtomicU64::new(0f64.to_bits())),
            percentiles: percentiles.into(),
        }
    }

    /// Record one sample
    ///
    /// NaN, infinite and negative samples are dropped: they would corrupt
    /// every statistic derived from the histogram.
    pub fn record(&self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            tracing::debug!(value, "Dropping non-finite or negative sample");
            return;
        }
        // -0.0 carries the sign bit and would compare as the largest bit pattern
        let value = if value == 0.0 { 0.0 } else { value };

        self.histogram.observe(value);
        // Non-negative finite floats order the same as their bit patterns
        self.max.fetch_max(value.to_bits(), Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.histogram.get_sample_count()
    }

    pub fn sum(&self) -> f64 {
        self.histogram.get_sample_sum()
    }

    /// Largest sample recorded since creation
    pub fn max(&self) -> f64 {
        f64::from_bits(self.max.load(Ordering::Relaxed))
    }

    /// Percentiles this distribution publishes
    pub fn published_percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// Take a consistent snapshot of count, sum and buckets
    pub fn take_snapshot(&self) -> HistogramSnapshot {
        let max = self.max();
        let families = self.histogram.collect();

        let from_proto = families
            .first()
            .and_then(|mf| mf.metric.first())
            .map(|metric| {
                let histogram: &prometheus::proto::Histogram = &metric.histogram;
                let buckets = histogram
                    .bucket
                    .iter()
                    .map(|b| {
                        (
                            b.upper_bound.unwrap_or(f64::INFINITY),
                            b.cumulative_count.unwrap_or(0),
                        )
                    })
                    .collect();
                (
                    histogram.sample_count.unwrap_or(0),
                    histogram.sample_sum.unwrap_or(0.0),
                    buckets,
                )
            });

        let (count, sum, buckets) =
            from_proto.unwrap_or_else(|| (self.count(), self.sum(), Vec::new()));

        HistogramSnapshot {
            count,
            sum,
            max,
            buckets,
        }
    }
}

/// Records durations in seconds
#[derive(Clone, Debug)]
pub struct Timer(Distribution);

impl Timer {
    pub(crate) fn new(distribution: Distribution) -> Self {
        Self(distribution)
    }

    pub fn record(&self, duration: Duration) {
        self.0.record(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.0.count()
    }

    /// Total recorded time in seconds
    pub fn total_seconds(&self) -> f64 {
        self.0.sum()
    }

    pub fn distribution(&self) -> &Distribution {
        &self.0
    }
}

/// Records arbitrary non-negative amounts such as byte counts
#[derive(Clone, Debug)]
pub struct DistributionSummary(Distribution);

impl DistributionSummary {
    pub(crate) fn new(distribution: Distribution) -> Self {
        Self(distribution)
    }

    pub fn record(&self, amount: f64) {
        self.0.record(amount);
    }

    pub fn count(&self) -> u64 {
        self.0.count()
    }

    pub fn total_amount(&self) -> f64 {
        self.0.sum()
    }

    pub fn distribution(&self) -> &Distribution {
        &self.0
    }
}
