//! Lifecycle event listeners
//!
//! [`InstrumentedEventListener`] counts every lifecycle event, records body
//! sizes and phase durations, then forwards the event to its delegates.

use super::events::{ALL_KINDS, Event, EventKind};
use crate::metrics::{
    DistributionConfig, DistributionSummary, MeterRegistry, Tags, Timer, names,
};
use prometheus::Counter;
use std::collections::HashMap;
use std::sync::Arc;

/// Receiver of transport lifecycle events
///
/// Called inline on the call path; implementations must not block.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: &Event<'_>);
}

impl<F> EventListener for F
where
    F: Fn(&Event<'_>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event<'_>) {
        self(event)
    }
}

/// Counter suffix per event kind
pub fn counter_suffix(kind: EventKind) -> &'static str {
    match kind {
        EventKind::CallStart => names::CALLS_STARTED,
        EventKind::CallEnd => names::CALLS_END,
        EventKind::CallFailed => names::CALLS_FAILED,
        EventKind::DnsStart => names::DNS_STARTED,
        EventKind::DnsEnd => names::DNS_END,
        EventKind::DnsFailed => names::DNS_FAILED,
        EventKind::ConnectStart => names::CONNECTIONS_STARTED,
        EventKind::ConnectEnd => names::CONNECTIONS_END,
        EventKind::ConnectFailed => names::CONNECTIONS_FAILED,
        EventKind::ConnectionAcquired => names::CONNECTIONS_ACQUIRED,
        EventKind::ConnectionReleased => names::CONNECTIONS_RELEASED,
        EventKind::RequestHeadersStart => names::REQUESTS_HEADERS_STARTED,
        EventKind::RequestHeadersEnd => names::REQUESTS_HEADERS_END,
        EventKind::RequestBodyStart => names::REQUESTS_BODY_STARTED,
        EventKind::RequestBodyEnd => names::REQUESTS_BODY_END,
        EventKind::RequestFailed => names::REQUESTS_FAILED,
        EventKind::ResponseHeadersStart => names::RESPONSES_HEADERS_STARTED,
        EventKind::ResponseHeadersEnd => names::RESPONSES_HEADERS_END,
        EventKind::ResponseBodyStart => names::RESPONSES_BODY_STARTED,
        EventKind::ResponseBodyEnd => names::RESPONSES_BODY_END,
        EventKind::ResponseFailed => names::RESPONSES_FAILED,
    }
}

/// Listener recording lifecycle metrics and fanning events out to delegates
pub struct InstrumentedEventListener {
    counters: HashMap<EventKind, Counter>,
    request_body_bytes: DistributionSummary,
    response_body_bytes: DistributionSummary,
    call_duration: Timer,
    dns_duration: Timer,
    connect_duration: Timer,
    calls_timeout: Counter,
    connections_timeout: Counter,
    delegates: Vec<Arc<dyn EventListener>>,
}

impl InstrumentedEventListener {
    /// Register every lifecycle meter under `prefix`
    ///
    /// # Errors
    ///
    /// Returns the registry error if any meter name is already taken by a
    /// meter of a different kind.
    pub fn new(
        registry: &MeterRegistry,
        prefix: &str,
        tags: &Tags,
        durations: &DistributionConfig,
        delegates: Vec<Arc<dyn EventListener>>,
    ) -> prometheus::Result<Self> {
        let mut counters = HashMap::with_capacity(ALL_KINDS.len());
        for kind in ALL_KINDS {
            let counter = registry.counter(&names::join(prefix, counter_suffix(kind)), tags)?;
            counters.insert(kind, counter);
        }

        let bytes = DistributionConfig::new(
            DistributionConfig::bytes().buckets().to_vec(),
            durations.percentiles().to_vec(),
        );

        Ok(Self {
            counters,
            request_body_bytes: registry.summary(
                &names::join(prefix, names::REQUESTS_BODY_BYTES),
                tags,
                &bytes,
            )?,
            response_body_bytes: registry.summary(
                &names::join(prefix, names::RESPONSES_BODY_BYTES),
                tags,
                &bytes,
            )?,
            call_duration: registry.timer(
                &names::join(prefix, names::CALLS_DURATION),
                tags,
                durations,
            )?,
            dns_duration: registry.timer(
                &names::join(prefix, names::DNS_DURATION),
                tags,
                durations,
            )?,
            connect_duration: registry.timer(
                &names::join(prefix, names::CONNECTIONS_DURATION),
                tags,
                durations,
            )?,
            calls_timeout: registry.counter(&names::join(prefix, names::CALLS_TIMEOUT), tags)?,
            connections_timeout: registry
                .counter(&names::join(prefix, names::CONNECTIONS_TIMEOUT), tags)?,
            delegates,
        })
    }

    pub fn delegates(&self) -> &[Arc<dyn EventListener>] {
        &self.delegates
    }

    fn record(&self, event: &Event<'_>) {
        if let Some(counter) = self.counters.get(&event.kind()) {
            counter.inc();
        }

        match *event {
            Event::RequestBodyEnd { bytes } => self.request_body_bytes.record(bytes as f64),
            Event::ResponseBodyEnd { bytes } => self.response_body_bytes.record(bytes as f64),
            Event::CallEnd { elapsed } => self.call_duration.record(elapsed),
            Event::CallFailed { elapsed, error } => {
                self.call_duration.record(elapsed);
                if error.is_timeout() {
                    if error.is_connect() {
                        self.connections_timeout.inc();
                    } else {
                        self.calls_timeout.inc();
                    }
                }
            }
            Event::DnsEnd { elapsed, .. } => self.dns_duration.record(elapsed),
            Event::ConnectEnd { elapsed } | Event::ConnectFailed { elapsed, .. } => {
                self.connect_duration.record(elapsed)
            }
            _ => {}
        }
    }
}

impl EventListener for InstrumentedEventListener {
    fn on_event(&self, event: &Event<'_>) {
        self.record(event);
        for delegate in &self.delegates {
            delegate.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn listener(
        registry: &MeterRegistry,
        delegates: Vec<Arc<dyn EventListener>>,
    ) -> InstrumentedEventListener {
        InstrumentedEventListener::new(
            registry,
            "callmeter",
            &Tags::empty(),
            &DistributionConfig::durations(),
            delegates,
        )
        .unwrap()
    }

    #[test]
    fn test_registers_one_counter_per_kind() {
        let registry = MeterRegistry::new();
        let listener = listener(&registry, Vec::new());
        assert_eq!(listener.counters.len(), ALL_KINDS.len());
        assert_eq!(
            registry.value("callmeter.requests.headers.started", &Tags::empty()),
            Some(0.0)
        );
    }

    #[test]
    fn test_event_increments_mapped_counter() {
        let registry = MeterRegistry::new();
        let listener = listener(&registry, Vec::new());

        listener.on_event(&Event::ConnectStart);
        listener.on_event(&Event::ConnectStart);
        listener.on_event(&Event::DnsStart { host: "example.com" });

        assert_eq!(
            registry.value("callmeter.connections.started", &Tags::empty()),
            Some(2.0)
        );
        assert_eq!(
            registry.value("callmeter.dns.started", &Tags::empty()),
            Some(1.0)
        );
    }

    #[test]
    fn test_body_end_records_byte_summary() {
        let registry = MeterRegistry::new();
        let listener = listener(&registry, Vec::new());

        listener.on_event(&Event::ResponseBodyEnd { bytes: 512 });
        listener.on_event(&Event::ResponseBodyEnd { bytes: 1536 });

        assert_eq!(listener.response_body_bytes.count(), 2);
        assert_eq!(listener.response_body_bytes.total_amount(), 2048.0);
        assert_eq!(listener.request_body_bytes.count(), 0);
    }

    #[test]
    fn test_end_events_record_durations() {
        let registry = MeterRegistry::new();
        let listener = listener(&registry, Vec::new());

        listener.on_event(&Event::CallEnd {
            elapsed: Duration::from_millis(40),
        });
        listener.on_event(&Event::DnsEnd {
            host: "example.com",
            addresses: 2,
            elapsed: Duration::from_millis(3),
        });

        assert_eq!(listener.call_duration.count(), 1);
        assert_eq!(listener.dns_duration.count(), 1);
        assert_eq!(listener.connect_duration.count(), 0);
    }

    #[test]
    fn test_delegates_receive_each_event_once_in_order() {
        let registry = MeterRegistry::new();
        let seen: Arc<Mutex<Vec<(usize, EventKind)>>> = Arc::new(Mutex::new(Vec::new()));

        let delegates: Vec<Arc<dyn EventListener>> = (0..3)
            .map(|i| {
                let seen = Arc::clone(&seen);
                Arc::new(move |event: &Event<'_>| {
                    seen.lock().unwrap().push((i, event.kind()));
                }) as Arc<dyn EventListener>
            })
            .collect();

        let listener = listener(&registry, delegates);
        listener.on_event(&Event::RequestBodyEnd { bytes: 7 });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (0, EventKind::RequestBodyEnd),
                (1, EventKind::RequestBodyEnd),
                (2, EventKind::RequestBodyEnd),
            ]
        );
    }

    #[test]
    fn test_delegates_see_identical_payload() {
        let registry = MeterRegistry::new();
        let bytes_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bytes_seen);
        let delegate: Arc<dyn EventListener> = Arc::new(move |event: &Event<'_>| {
            if let Event::RequestBodyEnd { bytes } = event {
                sink.lock().unwrap().push(*bytes);
            }
        });

        let listener = listener(&registry, vec![delegate.clone(), delegate]);
        listener.on_event(&Event::RequestBodyEnd { bytes: 99 });

        assert_eq!(*bytes_seen.lock().unwrap(), vec![99, 99]);
    }

    #[test]
    fn test_second_listener_shares_counters() {
        let registry = MeterRegistry::new();
        let first = listener(&registry, Vec::new());
        let second = listener(&registry, Vec::new());

        first.on_event(&Event::RequestHeadersStart);
        second.on_event(&Event::RequestHeadersStart);

        assert_eq!(
            registry.value("callmeter.requests.headers.started", &Tags::empty()),
            Some(2.0)
        );
    }
}
