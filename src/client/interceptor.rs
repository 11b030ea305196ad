//! Request lifecycle interceptor
//!
//! [`InstrumentedLayer`] wraps any `Service<reqwest::Request>` and counts
//! submitted, running, completed and failed requests, recording the
//! elapsed time globally and per destination host.
//!
//! Requests already carrying [`MARKER_HEADER`] pass through untouched, so
//! stacking the layer twice never double counts.

use crate::metrics::{DistributionConfig, MeterRegistry, Tags, Timer, names};
use futures::future::BoxFuture;
use prometheus::{Counter, IntGauge};
use reqwest::header::HeaderValue;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Header attached to every request seen by the interceptor
pub const MARKER_HEADER: &str = "x-callmeter-instrumented";

/// Meters shared by every service produced from one layer
pub struct InterceptorMetrics {
    registry: Arc<MeterRegistry>,
    prefix: String,
    tags: Tags,
    durations: DistributionConfig,
    submitted: Counter,
    running: IntGauge,
    completed: Counter,
    failed: Counter,
    duration: Timer,
}

impl InterceptorMetrics {
    pub fn new(
        registry: Arc<MeterRegistry>,
        prefix: &str,
        tags: Tags,
        durations: DistributionConfig,
    ) -> prometheus::Result<Self> {
        let submitted =
            registry.counter(&names::join(prefix, names::NETWORK_REQUESTS_SUBMITTED), &tags)?;
        let running =
            registry.up_down_counter(&names::join(prefix, names::NETWORK_REQUESTS_RUNNING), &tags)?;
        let completed =
            registry.counter(&names::join(prefix, names::NETWORK_REQUESTS_COMPLETED), &tags)?;
        let failed = registry.counter(&names::join(prefix, names::NETWORK_REQUESTS_FAILED), &tags)?;
        let duration = registry.timer(
            &names::join(prefix, names::NETWORK_REQUESTS_DURATION),
            &tags,
            &durations,
        )?;

        Ok(Self {
            registry,
            prefix: prefix.to_string(),
            tags,
            durations,
            submitted,
            running,
            completed,
            failed,
            duration,
        })
    }

    /// Timer for one destination host, created on first use
    fn destination_timer(&self, host: &str, method: &str) -> Option<Timer> {
        let name = format!(
            "{}.{}",
            names::join(&self.prefix, names::NETWORK_DESTINATIONS),
            host
        );
        let tags = self.tags.clone().and("method", method);

        match self.registry.timer(&name, &tags, &self.durations) {
            Ok(timer) => Some(timer),
            Err(e) => {
                self.registry
                    .recording_failure(&self.prefix, "destination_timer", &e);
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct InstrumentedLayer {
    metrics: Arc<InterceptorMetrics>,
}

impl InstrumentedLayer {
    pub fn new(metrics: InterceptorMetrics) -> Self {
        Self {
            metrics: Arc::new(metrics),
        }
    }
}

impl<S> Layer<S> for InstrumentedLayer {
    type Service = Instrumented<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Instrumented {
            inner,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

#[derive(Clone)]
pub struct Instrumented<S> {
    inner: S,
    metrics: Arc<InterceptorMetrics>,
}

impl<S> Service<reqwest::Request> for Instrumented<S>
where
    S: Service<reqwest::Request, Response = reqwest::Response, Error = reqwest::Error>,
    S::Future: Send + 'static,
{
    type Response = reqwest::Response;
    type Error = reqwest::Error;
    type Future = BoxFuture<'static, Result<reqwest::Response, reqwest::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: reqwest::Request) -> Self::Future {
        if request.headers().contains_key(MARKER_HEADER) {
            return Box::pin(self.inner.call(request));
        }

        request
            .headers_mut()
            .insert(MARKER_HEADER, HeaderValue::from_static("true"));

        let in_flight = InFlight::start(
            Arc::clone(&self.metrics),
            request.url().host_str().unwrap_or("unknown").to_string(),
            request.method().as_str().to_string(),
        );
        let response = self.inner.call(request);

        Box::pin(async move {
            let result = response.await;
            in_flight.finish(result.is_err());
            result
        })
    }
}

/// Bookkeeping for one request; completes on finish or on drop
struct InFlight {
    metrics: Arc<InterceptorMetrics>,
    host: String,
    method: String,
    started: Instant,
    failed: bool,
}

impl InFlight {
    fn start(metrics: Arc<InterceptorMetrics>, host: String, method: String) -> Self {
        metrics.submitted.inc();
        metrics.running.inc();
        Self {
            metrics,
            host,
            method,
            started: Instant::now(),
            failed: false,
        }
    }

    fn finish(mut self, failed: bool) {
        self.failed = failed;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let metrics = &self.metrics;

        metrics.running.dec();
        metrics.completed.inc();
        if self.failed {
            metrics.failed.inc();
        }
        metrics.duration.record(elapsed);
        if let Some(timer) = metrics.destination_timer(&self.host, &self.method) {
            timer.record(elapsed);
        }

        tracing::debug!(
            host = %self.host,
            method = %self.method,
            elapsed_ms = elapsed.as_millis() as u64,
            failed = self.failed,
            "Request completed"
        );
    }
}
