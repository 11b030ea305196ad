//! Per-request timer
//!
//! Records `<prefix>.requests` for every request, tagged with the method,
//! the mapped URI, the status code and its outcome class.

use super::url_mapper::UrlMapper;
use crate::metrics::{DistributionConfig, MeterRegistry, Tags, names};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Status tag used when no response was received
pub const IO_ERROR: &str = "IO_ERROR";

/// Tag value for a configured request tag key missing from the request
pub const MISSING_TAG_VALUE: &str = "none";

/// Outcome class of a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl Outcome {
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => Outcome::Informational,
            200..=299 => Outcome::Success,
            300..=399 => Outcome::Redirection,
            400..=499 => Outcome::ClientError,
            500..=599 => Outcome::ServerError,
            _ => Outcome::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Informational => "INFORMATIONAL",
            Outcome::Success => "SUCCESS",
            Outcome::Redirection => "REDIRECTION",
            Outcome::ClientError => "CLIENT_ERROR",
            Outcome::ServerError => "SERVER_ERROR",
            Outcome::Unknown => "UNKNOWN",
        }
    }
}

/// Tagging options for the request timer
#[derive(Debug, Clone)]
pub struct RequestTimerConfig {
    pub prefix: String,
    pub extra_tags: Tags,
    pub include_host_tag: bool,
    pub url_mapper: UrlMapper,
    pub request_tag_keys: Vec<String>,
    pub durations: DistributionConfig,
}

struct Shared {
    registry: Arc<MeterRegistry>,
    name: String,
    config: RequestTimerConfig,
}

#[derive(Clone)]
pub struct RequestTimerLayer {
    shared: Arc<Shared>,
}

impl RequestTimerLayer {
    pub fn new(registry: Arc<MeterRegistry>, config: RequestTimerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                name: names::join(&config.prefix, names::REQUESTS),
                config,
            }),
        }
    }
}

impl<S> Layer<S> for RequestTimerLayer {
    type Service = RequestTimer<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTimer {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Clone)]
pub struct RequestTimer<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl Shared {
    /// Tags known before the response: everything except status and outcome
    fn request_tags(&self, request: &reqwest::Request) -> Tags {
        let config = &self.config;
        let mut tags = config
            .extra_tags
            .clone()
            .and("method", request.method().as_str())
            .and("uri", config.url_mapper.map(request.url()));

        if config.include_host_tag {
            tags = tags.and("host", request.url().host_str().unwrap_or(MISSING_TAG_VALUE));
        }

        for key in &config.request_tag_keys {
            let value = request
                .headers()
                .get(key.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or(MISSING_TAG_VALUE);
            tags = tags.and(key.as_str(), value);
        }
        tags
    }

    fn record(&self, tags: Tags, status: Option<StatusCode>, started: Instant) {
        let tags = match status {
            Some(status) => tags
                .and("status", status.as_str())
                .and("outcome", Outcome::of(status).as_str()),
            None => tags
                .and("status", IO_ERROR)
                .and("outcome", Outcome::Unknown.as_str()),
        };

        match self
            .registry
            .timer(&self.name, &tags, &self.config.durations)
        {
            Ok(timer) => timer.record(started.elapsed()),
            Err(e) => self
                .registry
                .recording_failure(&self.config.prefix, "request_timer", &e),
        }
    }
}

impl<S> Service<reqwest::Request> for RequestTimer<S>
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

    fn call(&mut self, request: reqwest::Request) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        let tags = shared.request_tags(&request);
        let started = Instant::now();
        let response = self.inner.call(request);

        Box::pin(async move {
            let result = response.await;
            let status = result.as_ref().ok().map(|r| r.status());
            shared.record(tags, status, started);
            result
        })
    }
}
