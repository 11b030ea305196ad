//! Flattened metrics snapshot
//!
//! [`MetricsExporter`] reads every meter under a prefix and flattens it into
//! `key -> value` pairs:
//!
//! - counters and gauges: `name`
//! - timers and summaries: `name.count`, `name.sum`, `name.mean`,
//!   `name.max`, `name.percentile.<q>`, `name.bucket.<le>`
//!
//! Meters sharing a name with different tags are keyed `name{k=v,...}`.

use crate::metrics::{HistogramSnapshot, Meter, MeterId, MeterRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Client library reported in the snapshot document
pub const CLIENT_NAME: &str = "reqwest";

/// Snapshot document served by the read endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub client: &'static str,
    pub prefix: String,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct MetricsExporter {
    registry: Arc<MeterRegistry>,
    prefix: String,
}

impl MetricsExporter {
    pub fn new(registry: Arc<MeterRegistry>, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn owns(&self, name: &str) -> bool {
        name == self.prefix
            || name
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Flatten every meter under the prefix
    ///
    /// Gauges re-read their live accessor on every call.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let meters: Vec<(MeterId, Meter)> = self
            .registry
            .meters()
            .into_iter()
            .filter(|(id, _)| self.owns(id.name()))
            .collect();

        let mut per_name: HashMap<&str, usize> = HashMap::new();
        for (id, _) in &meters {
            *per_name.entry(id.name()).or_default() += 1;
        }

        let mut flat = BTreeMap::new();
        for (id, meter) in &meters {
            let key = if per_name.get(id.name()).copied().unwrap_or(0) > 1 {
                format!("{}{{{}}}", id.name(), id.tags())
            } else {
                id.name().to_string()
            };

            match meter.distribution() {
                Some(distribution) => flatten_distribution(
                    &mut flat,
                    &key,
                    &distribution.take_snapshot(),
                    distribution.published_percentiles(),
                ),
                None => {
                    if let Some(value) = meter.value() {
                        flat.insert(key, value);
                    }
                }
            }
        }

        tracing::debug!(
            prefix = %self.prefix,
            meters = meters.len(),
            keys = flat.len(),
            "Built metrics snapshot"
        );
        flat
    }

    /// Snapshot document with client and prefix metadata
    pub fn read(&self) -> Snapshot {
        Snapshot {
            client: CLIENT_NAME,
            prefix: self.prefix.clone(),
            metrics: self.metrics(),
        }
    }
}

fn flatten_distribution(
    flat: &mut BTreeMap<String, f64>,
    key: &str,
    snapshot: &HistogramSnapshot,
    percentiles: &[f64],
) {
    flat.insert(format!("{key}.count"), snapshot.count as f64);
    flat.insert(format!("{key}.sum"), snapshot.sum);
    flat.insert(format!("{key}.mean"), snapshot.mean());
    flat.insert(format!("{key}.max"), snapshot.max);
    for &q in percentiles {
        flat.insert(format!("{key}.percentile.{q}"), snapshot.percentile(q));
    }
    for &(upper_bound, cumulative) in &snapshot.buckets {
        flat.insert(format!("{key}.bucket.{upper_bound}"), cumulative as f64);
    }
}
