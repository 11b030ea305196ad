//! Live gauges and function counters
//!
//! A [`FnGauge`] holds no value of its own. Every Prometheus collect and
//! every exporter snapshot calls the bound accessor, so the reported value
//! is always the live one.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, Opts};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Accessor bound to a live object
pub type Accessor = Arc<dyn Fn() -> f64 + Send + Sync>;

/// How a live value is exposed to Prometheus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// Point-in-time value that can go up and down
    Gauge,
    /// Monotonic value maintained by the observed object
    Counter,
}

enum Exposition {
    Gauge(Gauge),
    Counter(Counter),
}

/// Collector re-reading a live accessor on every collect
pub struct FnGauge {
    kind: FnKind,
    accessor: Accessor,
    exposition: Exposition,
    // Serializes the set-then-collect sequence across concurrent scrapes
    collect_lock: Mutex<()>,
}

impl FnGauge {
    pub(crate) fn new(kind: FnKind, opts: Opts, accessor: Accessor) -> prometheus::Result<Self> {
        let exposition = match kind {
            FnKind::Gauge => Exposition::Gauge(Gauge::with_opts(opts)?),
            FnKind::Counter => Exposition::Counter(Counter::with_opts(opts)?),
        };

        Ok(Self {
            kind,
            accessor,
            exposition,
            collect_lock: Mutex::new(()),
        })
    }

    pub fn kind(&self) -> FnKind {
        self.kind
    }

    /// Read the live value
    pub fn value(&self) -> f64 {
        (self.accessor)()
    }
}

impl fmt::Debug for FnGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGauge")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Collector for FnGauge {
    fn desc(&self) -> Vec<&Desc> {
        match &self.exposition {
            Exposition::Gauge(gauge) => gauge.desc(),
            Exposition::Counter(counter) => counter.desc(),
        }
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let value = self.value();
        let _guard = self
            .collect_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match &self.exposition {
            Exposition::Gauge(gauge) => {
                gauge.set(value);
                gauge.collect()
            }
            Exposition::Counter(counter) => {
                counter.reset();
                if value.is_finite() && value > 0.0 {
                    counter.inc_by(value);
                }
                counter.collect()
            }
        }
    }
}

/// Registry-facing wrapper so one `FnGauge` can be both indexed and registered
#[derive(Clone)]
pub(crate) struct SharedFnGauge(pub(crate) Arc<FnGauge>);

impl Collector for SharedFnGauge {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn live_value() -> (Arc<AtomicU64>, Accessor) {
        let value = Arc::new(AtomicU64::new(0));
        let reader = Arc::clone(&value);
        (value, Arc::new(move || reader.load(Ordering::Relaxed) as f64))
    }

    #[test]
    fn test_gauge_reads_live_value_on_every_collect() {
        let (value, accessor) = live_value();
        let gauge = FnGauge::new(FnKind::Gauge, Opts::new("live", "live value"), accessor)
            .expect("valid gauge");

        value.store(7, Ordering::Relaxed);
        let families = gauge.collect();
        assert_eq!(families[0].metric[0].gauge.value.unwrap_or(0.0), 7.0);

        value.store(3, Ordering::Relaxed);
        let families = gauge.collect();
        assert_eq!(families[0].metric[0].gauge.value.unwrap_or(0.0), 3.0);
    }

    #[test]
    fn test_counter_kind_exposes_counter_type() {
        let (value, accessor) = live_value();
        let counter = FnGauge::new(FnKind::Counter, Opts::new("opened", "opened"), accessor)
            .expect("valid counter");

        value.store(12, Ordering::Relaxed);
        let families = counter.collect();
        assert_eq!(
            families[0].metric[0].counter.value.unwrap_or(0.0),
            12.0
        );
        assert_eq!(counter.kind(), FnKind::Counter);
        assert_eq!(counter.value(), 12.0);
    }
}
