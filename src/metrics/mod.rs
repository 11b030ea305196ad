//! Meter registry for callmeter
//!
//! [`MeterRegistry`] is a get-or-create index over a Prometheus
//! [`Registry`]. Meters are addressed by a dotted name plus an ordered tag
//! set ([`MeterId`]); Prometheus owns storage and the text exposition.
//!
//! - Counters, up/down counters: `prometheus::Counter` / `IntGauge`
//! - Timers and summaries: `prometheus::Histogram` plus a live `_max` gauge
//! - Gauges and function counters: [`FnGauge`] collectors re-reading a
//!   live accessor on every scrape
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format
//! and flattened by [`crate::exporter::MetricsExporter`].

pub mod binders;
pub mod distribution;
pub mod gauge;
pub mod names;

pub use distribution::{
    Distribution, DistributionConfig, DistributionSummary, HistogramSnapshot, Timer,
};
pub use gauge::{Accessor, FnGauge, FnKind};

use gauge::SharedFnGauge;
use prometheus::core::Collector;
use prometheus::{
    Counter, Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Ordered key/value pairs attached to a meter at creation
///
/// Keys are unique; adding an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        pairs
            .into_iter()
            .fold(Self::empty(), |tags, (k, v)| tags.and(k, v))
    }

    /// Add or replace a tag
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    /// Append every tag of `other`, replacing values of shared keys
    pub fn and_all(self, other: &Tags) -> Self {
        other
            .iter()
            .fold(self, |tags, (k, v)| tags.and(k, v))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn const_labels(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (sanitize_label(k), v.clone()))
            .collect()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl From<&BTreeMap<String, String>> for Tags {
    fn from(map: &BTreeMap<String, String>) -> Self {
        Self::of(map.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

/// Identity of a meter: dotted name plus tag set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeterId {
    name: String,
    tags: Tags,
}

impl MeterId {
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

/// Kind of a registered meter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterKind {
    Counter,
    UpDownCounter,
    Timer,
    Summary,
    Gauge,
    FunctionCounter,
}

impl MeterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterKind::Counter => "counter",
            MeterKind::UpDownCounter => "up_down_counter",
            MeterKind::Timer => "timer",
            MeterKind::Summary => "summary",
            MeterKind::Gauge => "gauge",
            MeterKind::FunctionCounter => "function_counter",
        }
    }
}

/// Handle to a registered meter
#[derive(Clone, Debug)]
pub enum Meter {
    Counter(Counter),
    UpDownCounter(IntGauge),
    Timer(Timer),
    Summary(DistributionSummary),
    Gauge(Arc<FnGauge>),
    FunctionCounter(Arc<FnGauge>),
}

impl Meter {
    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::UpDownCounter(_) => MeterKind::UpDownCounter,
            Meter::Timer(_) => MeterKind::Timer,
            Meter::Summary(_) => MeterKind::Summary,
            Meter::Gauge(_) => MeterKind::Gauge,
            Meter::FunctionCounter(_) => MeterKind::FunctionCounter,
        }
    }

    /// Current value of single-valued meters; `None` for timers and summaries
    pub fn value(&self) -> Option<f64> {
        match self {
            Meter::Counter(c) => Some(c.get()),
            Meter::UpDownCounter(g) => Some(g.get() as f64),
            Meter::Gauge(g) | Meter::FunctionCounter(g) => Some(g.value()),
            Meter::Timer(_) | Meter::Summary(_) => None,
        }
    }

    /// Backing distribution of timers and summaries
    pub fn distribution(&self) -> Option<&Distribution> {
        match self {
            Meter::Timer(t) => Some(t.distribution()),
            Meter::Summary(s) => Some(s.distribution()),
            _ => None,
        }
    }
}

/// Convert a dotted meter name into a valid Prometheus metric name
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Convert a tag key into a valid Prometheus label name
pub fn sanitize_label(key: &str) -> String {
    let mut out: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Process-wide meter sink
///
/// Shared as `Arc<MeterRegistry>` between the instrumented client, the
/// binders and the read endpoints.
pub struct MeterRegistry {
    registry: Registry,
    meters: Mutex<HashMap<MeterId, Meter>>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            meters: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying Prometheus registry
    pub fn prometheus(&self) -> &Registry {
        &self.registry
    }

    /// Get or create a monotonic counter
    pub fn counter(&self, name: &str, tags: &Tags) -> prometheus::Result<Counter> {
        self.get_or_register(
            MeterId::new(name, tags.clone()),
            MeterKind::Counter,
            || {
                let counter = Counter::with_opts(opts(name, tags))?;
                let collectors: Vec<Box<dyn Collector>> = vec![Box::new(counter.clone())];
                Ok((Meter::Counter(counter), collectors))
            },
            |meter| match meter {
                Meter::Counter(c) => Some(c.clone()),
                _ => None,
            },
        )
    }

    /// Get or create an integer counter that accepts signed deltas
    pub fn up_down_counter(&self, name: &str, tags: &Tags) -> prometheus::Result<IntGauge> {
        self.get_or_register(
            MeterId::new(name, tags.clone()),
            MeterKind::UpDownCounter,
            || {
                let gauge = IntGauge::with_opts(opts(name, tags))?;
                let collectors: Vec<Box<dyn Collector>> = vec![Box::new(gauge.clone())];
                Ok((Meter::UpDownCounter(gauge), collectors))
            },
            |meter| match meter {
                Meter::UpDownCounter(g) => Some(g.clone()),
                _ => None,
            },
        )
    }

    /// Get or create a timer (seconds)
    pub fn timer(
        &self,
        name: &str,
        tags: &Tags,
        config: &DistributionConfig,
    ) -> prometheus::Result<Timer> {
        self.get_or_register(
            MeterId::new(name, tags.clone()),
            MeterKind::Timer,
            || {
                let (distribution, collectors) = distribution(name, tags, config)?;
                Ok((Meter::Timer(Timer::new(distribution)), collectors))
            },
            |meter| match meter {
                Meter::Timer(t) => Some(t.clone()),
                _ => None,
            },
        )
    }

    /// Get or create a distribution summary
    pub fn summary(
        &self,
        name: &str,
        tags: &Tags,
        config: &DistributionConfig,
    ) -> prometheus::Result<DistributionSummary> {
        self.get_or_register(
            MeterId::new(name, tags.clone()),
            MeterKind::Summary,
            || {
                let (distribution, collectors) = distribution(name, tags, config)?;
                Ok((
                    Meter::Summary(DistributionSummary::new(distribution)),
                    collectors,
                ))
            },
            |meter| match meter {
                Meter::Summary(s) => Some(s.clone()),
                _ => None,
            },
        )
    }

    /// Bind a gauge to a live accessor
    ///
    /// If the name and tags are already bound, the existing binding is kept.
    pub fn gauge<F>(&self, name: &str, tags: &Tags, accessor: F) -> prometheus::Result<()>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.bind_fn(name, tags, FnKind::Gauge, Arc::new(accessor))
    }

    /// Bind a function counter to a live, monotonically increasing accessor
    pub fn function_counter<F>(
        &self,
        name: &str,
        tags: &Tags,
        accessor: F,
    ) -> prometheus::Result<()>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.bind_fn(name, tags, FnKind::Counter, Arc::new(accessor))
    }

    fn bind_fn(
        &self,
        name: &str,
        tags: &Tags,
        kind: FnKind,
        accessor: Accessor,
    ) -> prometheus::Result<()> {
        let meter_kind = match kind {
            FnKind::Gauge => MeterKind::Gauge,
            FnKind::Counter => MeterKind::FunctionCounter,
        };

        self.get_or_register(
            MeterId::new(name, tags.clone()),
            meter_kind,
            || {
                let gauge = Arc::new(FnGauge::new(kind, opts(name, tags), accessor)?);
                let collectors: Vec<Box<dyn Collector>> =
                    vec![Box::new(SharedFnGauge(Arc::clone(&gauge)))];
                let meter = match kind {
                    FnKind::Gauge => Meter::Gauge(gauge),
                    FnKind::Counter => Meter::FunctionCounter(gauge),
                };
                Ok((meter, collectors))
            },
            |meter| match meter {
                Meter::Gauge(_) | Meter::FunctionCounter(_) => Some(()),
                _ => None,
            },
        )
    }

    /// Look up a registered meter
    pub fn find(&self, name: &str, tags: &Tags) -> Option<Meter> {
        self.lock_meters()
            .get(&MeterId::new(name, tags.clone()))
            .cloned()
    }

    /// Current value of a single-valued meter (counter, gauge, ...)
    pub fn value(&self, name: &str, tags: &Tags) -> Option<f64> {
        self.find(name, tags).and_then(|meter| meter.value())
    }

    /// Snapshot of every registered meter handle
    pub fn meters(&self) -> Vec<(MeterId, Meter)> {
        self.lock_meters()
            .iter()
            .map(|(id, meter)| (id.clone(), meter.clone()))
            .collect()
    }

    /// Count a metric registration or recording failure on the call path
    ///
    /// Failures are logged and counted under
    /// `<prefix>.metrics.recording.failures{operation}`; they never reach
    /// the caller of the instrumented operation.
    pub fn recording_failure(&self, prefix: &str, operation: &str, error: &prometheus::Error) {
        tracing::warn!(
            operation,
            error = %error,
            "Metric recording failed; the call outcome is unaffected"
        );

        let name = names::join(prefix, names::METRICS_RECORDING_FAILURES);
        match self.counter(&name, &Tags::of([("operation", operation)])) {
            Ok(counter) => counter.inc(),
            Err(e) => tracing::error!(
                error = %e,
                "Failed to register the recording failure counter"
            ),
        }
    }

    fn lock_meters(&self) -> std::sync::MutexGuard<'_, HashMap<MeterId, Meter>> {
        self.meters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get_or_register<T>(
        &self,
        id: MeterId,
        kind: MeterKind,
        create: impl FnOnce() -> prometheus::Result<(Meter, Vec<Box<dyn Collector>>)>,
        extract: impl Fn(&Meter) -> Option<T>,
    ) -> prometheus::Result<T> {
        let mut meters = self.lock_meters();

        if let Some(existing) = meters.get(&id) {
            return extract(existing).ok_or_else(|| {
                prometheus::Error::Msg(format!(
                    "meter '{}' [{}] is already registered as a {}, requested a {}",
                    id.name(),
                    id.tags(),
                    existing.kind().as_str(),
                    kind.as_str()
                ))
            });
        }

        let (meter, collectors) = create()?;
        let mut registered: Vec<Box<dyn Collector>> = Vec::with_capacity(collectors.len());
        for collector in collectors {
            let handle = DescOnly::of(collector.as_ref());
            if let Err(e) = self.registry.register(collector) {
                for done in registered {
                    let _ = self.registry.unregister(done);
                }
                return Err(e);
            }
            registered.push(handle);
        }

        tracing::debug!(
            name = id.name(),
            tags = %id.tags(),
            kind = kind.as_str(),
            "Registered meter"
        );

        let value = extract(&meter).ok_or_else(|| {
            prometheus::Error::Msg(format!("meter '{}' created with wrong kind", id.name()))
        })?;
        meters.insert(id, meter);
        Ok(value)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            let metric_names: Vec<_> = metric_families.iter().map(|mf| mf.name()).collect();

            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                metric_names = ?metric_names,
                "Prometheus text encoder failed"
            );

            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}

impl Default for MeterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MeterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterRegistry")
            .field("meters", &self.lock_meters().len())
            .finish()
    }
}

/// Collector exposing only descriptors; `Registry::unregister` matches on them
struct DescOnly(Vec<prometheus::core::Desc>);

impl DescOnly {
    fn of(collector: &dyn Collector) -> Box<dyn Collector> {
        Box::new(DescOnly(collector.desc().into_iter().cloned().collect()))
    }
}

impl Collector for DescOnly {
    fn desc(&self) -> Vec<&prometheus::core::Desc> {
        self.0.iter().collect()
    }

    fn collect(&self) -> Vec<prometheus::proto::MetricFamily> {
        Vec::new()
    }
}

fn opts(name: &str, tags: &Tags) -> Opts {
    Opts::new(sanitize(name), name.to_string()).const_labels(tags.const_labels())
}

fn distribution(
    name: &str,
    tags: &Tags,
    config: &DistributionConfig,
) -> prometheus::Result<(Distribution, Vec<Box<dyn Collector>>)> {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(sanitize(name), name.to_string())
            .const_labels(tags.const_labels())
            .buckets(config.buckets().to_vec()),
    )?;
    let distribution = Distribution::new(histogram.clone(), config.percentiles());

    let max_source = distribution.clone();
    let max = FnGauge::new(
        FnKind::Gauge,
        Opts::new(format!("{}_max", sanitize(name)), format!("{name} max"))
            .const_labels(tags.const_labels()),
        Arc::new(move || max_source.max()),
    )?;

    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(histogram),
        Box::new(SharedFnGauge(Arc::new(max))),
    ];
    Ok((distribution, collectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_sanitize_replaces_dots_and_dashes() {
        assert_eq!(sanitize("callmeter.calls.started"), "callmeter_calls_started");
        assert_eq!(
            sanitize("callmeter.network.destinations.api-1.example.com"),
            "callmeter_network_destinations_api_1_example_com"
        );
        assert_eq!(sanitize("9lives"), "_9lives");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn test_sanitize_label_rejects_colons() {
        assert_eq!(sanitize_label("app:env"), "app_env");
        assert_eq!(sanitize_label("x-request-tag"), "x_request_tag");
    }

    #[test]
    fn test_tags_and_replaces_existing_key() {
        let tags = Tags::of([("env", "dev"), ("region", "eu")]).and("env", "prod");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(tags.to_string(), "env=prod,region=eu");
    }

    #[test]
    fn test_counter_is_get_or_create() {
        let registry = MeterRegistry::new();
        let tags = Tags::of([("env", "test")]);

        let first = registry.counter("callmeter.calls.started", &tags).unwrap();
        first.inc();
        let second = registry.counter("callmeter.calls.started", &tags).unwrap();
        second.inc();

        assert_eq!(
            registry.value("callmeter.calls.started", &tags),
            Some(2.0),
            "both handles must point at the same counter"
        );
    }

    #[test]
    fn test_same_name_different_tag_values_are_distinct_meters() {
        let registry = MeterRegistry::new();
        let get = Tags::of([("method", "GET")]);
        let post = Tags::of([("method", "POST")]);
        let config = DistributionConfig::durations();

        registry
            .timer("callmeter.network.destinations.example.com", &get, &config)
            .unwrap()
            .record(std::time::Duration::from_millis(5));
        registry
            .timer("callmeter.network.destinations.example.com", &post, &config)
            .unwrap();

        assert_eq!(registry.meters().len(), 2);
    }

    #[test]
    fn test_kind_conflict_is_an_error() {
        let registry = MeterRegistry::new();
        registry.counter("callmeter.x", &Tags::empty()).unwrap();

        let err = registry
            .up_down_counter("callmeter.x", &Tags::empty())
            .unwrap_err();
        assert!(err.to_string().contains("already registered as a counter"));
    }

    #[test]
    fn test_up_down_counter_accepts_negative_deltas() {
        let registry = MeterRegistry::new();
        let running = registry
            .up_down_counter("callmeter.network.requests.running", &Tags::empty())
            .unwrap();
        running.inc();
        running.inc();
        running.dec();
        assert_eq!(
            registry.value("callmeter.network.requests.running", &Tags::empty()),
            Some(1.0)
        );
    }

    #[test]
    fn test_gauge_is_read_live() {
        let registry = MeterRegistry::new();
        let value = Arc::new(AtomicU64::new(4));
        let reader = Arc::clone(&value);
        registry
            .gauge("callmeter.pool.queued", &Tags::empty(), move || {
                reader.load(Ordering::Relaxed) as f64
            })
            .unwrap();

        assert_eq!(registry.value("callmeter.pool.queued", &Tags::empty()), Some(4.0));
        value.store(9, Ordering::Relaxed);
        assert_eq!(registry.value("callmeter.pool.queued", &Tags::empty()), Some(9.0));
    }

    #[test]
    fn test_rebinding_gauge_keeps_first_binding() {
        let registry = MeterRegistry::new();
        registry.gauge("callmeter.g", &Tags::empty(), || 1.0).unwrap();
        registry.gauge("callmeter.g", &Tags::empty(), || 2.0).unwrap();
        assert_eq!(registry.value("callmeter.g", &Tags::empty()), Some(1.0));
    }

    #[test]
    fn test_gather_exposes_timer_histogram_and_max() {
        let registry = MeterRegistry::new();
        let timer = registry
            .timer(
                "callmeter.calls.duration",
                &Tags::empty(),
                &DistributionConfig::durations(),
            )
            .unwrap();
        timer.record(std::time::Duration::from_millis(20));

        let output = registry.gather().unwrap();
        assert!(output.contains("# TYPE callmeter_calls_duration histogram"));
        assert!(output.contains("callmeter_calls_duration_count 1"));
        assert!(output.contains("callmeter_calls_duration_max 0.02"));
    }

    #[test]
    fn test_gather_includes_const_labels() {
        let registry = MeterRegistry::new();
        registry
            .counter("callmeter.calls.started", &Tags::of([("env", "prod")]))
            .unwrap()
            .inc();

        let output = registry.gather().unwrap();
        assert!(output.contains("callmeter_calls_started{env=\"prod\"} 1"));
    }

    #[test]
    fn test_recording_failure_is_counted() {
        let registry = MeterRegistry::new();
        registry.recording_failure(
            "callmeter",
            "destination_timer",
            &prometheus::Error::Msg("boom".to_string()),
        );

        assert_eq!(
            registry.value(
                "callmeter.metrics.recording.failures",
                &Tags::of([("operation", "destination_timer")])
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_concurrent_counter_increments() {
        let registry = Arc::new(MeterRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    registry
                        .counter("callmeter.concurrent", &Tags::empty())
                        .unwrap()
                        .inc();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(
            registry.value("callmeter.concurrent", &Tags::empty()),
            Some(800.0)
        );
    }
}
