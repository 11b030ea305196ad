//! Instrumented HTTP client
//!
//! [`InstrumentedClient`] owns a configured `reqwest::Client` and a tower
//! stack around it:
//!
//! ```text
//! execute ─> dispatcher ─> InstrumentedLayer ─> RequestTimerLayer ─> reqwest::Client
//!                                                                     ├─ InstrumentedResolver (DNS)
//!                                                                     └─ ConnectLayer (connects)
//! ```
//!
//! Lifecycle events are fired from `execute`, the resolver and the connect
//! layer into one [`InstrumentedEventListener`]. Responses and errors are
//! returned unchanged.

pub mod connect;
pub mod dispatcher;
pub mod dns;
pub mod events;
pub mod interceptor;
pub mod listener;
pub mod request_timer;
pub mod url_mapper;

pub use connect::{ConnectLayer, ConnectionStats};
pub use dispatcher::{DispatchPermit, Dispatcher};
pub use dns::{InstrumentedResolver, SystemResolver};
pub use events::{Event, EventKind};
pub use interceptor::{InstrumentedLayer, InterceptorMetrics, MARKER_HEADER};
pub use listener::{EventListener, InstrumentedEventListener};
pub use request_timer::{RequestTimerConfig, RequestTimerLayer};
pub use url_mapper::UrlMapper;

use crate::config::Config;
use crate::error::AppResult;
use crate::metrics::binders::{
    CacheMetrics, CacheStats, ConnectionPoolMetrics, DispatcherMetrics, DispatcherStats,
    MeterBinder,
};
use crate::metrics::{DistributionConfig, MeterRegistry, Tags, names};
use bytes::Bytes;
use interceptor::Instrumented;
use request_timer::RequestTimer;
use reqwest::dns::Resolve;
use reqwest::header::HeaderMap;
use reqwest::{IntoUrl, Method, StatusCode, Url};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::{ServiceBuilder, ServiceExt};
use tracing::Instrument;
use uuid::Uuid;

type Stack = Instrumented<RequestTimer<reqwest::Client>>;

/// HTTP client recording lifecycle metrics into a [`MeterRegistry`]
#[derive(Clone)]
pub struct InstrumentedClient {
    raw: reqwest::Client,
    stack: Stack,
    listener: Arc<dyn EventListener>,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionStats>,
    registry: Arc<MeterRegistry>,
    prefix: String,
}

impl InstrumentedClient {
    pub fn builder(registry: Arc<MeterRegistry>) -> InstrumentedClientBuilder {
        InstrumentedClientBuilder::new(registry)
    }

    /// Build a client from the `[metrics]` and `[client]` config sections
    pub fn from_config(config: &Config, registry: Arc<MeterRegistry>) -> AppResult<Self> {
        let metrics = &config.metrics;
        let client = &config.client;

        let raw = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(client.connect_timeout_seconds))
            .timeout(Duration::from_secs(client.request_timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(client.pool_idle_timeout_seconds))
            .user_agent(client.user_agent.clone());

        Self::builder(registry)
            .prefix(&metrics.prefix)
            .tags(metrics.tags())
            .include_host_tag(metrics.include_host_tag)
            .url_mapper(metrics.url_mapper)
            .request_tag_keys(metrics.request_tag_keys.clone())
            .durations(metrics.durations())
            .client_builder(raw)
            .pool_max_idle_per_host(client.pool_max_idle_per_host)
            .max_requests(client.max_requests)
            .max_requests_per_host(client.max_requests_per_host)
            .build()
    }

    /// Underlying client, for building requests
    pub fn raw(&self) -> &reqwest::Client {
        &self.raw
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> reqwest::RequestBuilder {
        self.raw.get(url)
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> reqwest::RequestBuilder {
        self.raw.request(method, url)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn connection_stats(&self) -> &Arc<ConnectionStats> {
        &self.connections
    }

    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build and execute a request
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<InstrumentedResponse, reqwest::Error> {
        self.execute(request.build()?).await
    }

    /// Execute a request through the instrumented stack
    ///
    /// # Errors
    ///
    /// Returns the transport error unchanged after recording it.
    pub async fn execute(
        &self,
        request: reqwest::Request,
    ) -> Result<InstrumentedResponse, reqwest::Error> {
        let call_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "call",
            %call_id,
            method = %request.method(),
            url = %request.url()
        );
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(
        &self,
        request: reqwest::Request,
    ) -> Result<InstrumentedResponse, reqwest::Error> {
        let listener = &self.listener;
        let host = request.url().host_str().unwrap_or("unknown").to_string();

        listener.on_event(&Event::CallStart {
            method: request.method(),
            url: request.url(),
        });
        // Ends the call even if the future is dropped while queued
        let mut scope = CallScope::new(Arc::clone(listener), host.clone(), Instant::now());

        let permit = self.dispatcher.acquire(&host).await;
        listener.on_event(&Event::ConnectionAcquired { host: &host });
        scope.permit = Some(permit);

        listener.on_event(&Event::RequestHeadersStart);
        listener.on_event(&Event::RequestHeadersEnd {
            headers: request.headers(),
        });
        if let Some(body) = request.body() {
            listener.on_event(&Event::RequestBodyStart);
            // Streaming bodies have no length known up front
            let bytes = body.as_bytes().map_or(0, |b| b.len() as u64);
            listener.on_event(&Event::RequestBodyEnd { bytes });
        }

        match self.stack.clone().oneshot(request).await {
            Ok(response) => {
                listener.on_event(&Event::ResponseHeadersStart);
                listener.on_event(&Event::ResponseHeadersEnd {
                    status: response.status(),
                    headers: response.headers(),
                });
                tracing::debug!(status = %response.status(), "Response headers received");
                Ok(InstrumentedResponse {
                    inner: response,
                    scope,
                })
            }
            Err(error) => {
                // Connect failures are reported by the connect layer
                if !error.is_connect() {
                    let event = if error.is_body() || error.is_decode() {
                        Event::ResponseFailed { error: &error }
                    } else {
                        Event::RequestFailed { error: &error }
                    };
                    listener.on_event(&event);
                }
                tracing::debug!(error = %error, "Call failed");
                scope.fail(&error);
                Err(error)
            }
        }
    }
}

impl fmt::Debug for InstrumentedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedClient")
            .field("prefix", &self.prefix)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Call bookkeeping from call start until the response is consumed
///
/// Fires call end or call failed exactly once, on finish, on failure or on
/// drop. Once a dispatcher slot is held it is released first, with the
/// connection-released event.
struct CallScope {
    listener: Arc<dyn EventListener>,
    host: String,
    started: Instant,
    permit: Option<DispatchPermit>,
    done: bool,
}

impl CallScope {
    fn new(listener: Arc<dyn EventListener>, host: String, started: Instant) -> Self {
        Self {
            listener,
            host,
            started,
            permit: None,
            done: false,
        }
    }

    fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.listener
                .on_event(&Event::ConnectionReleased { host: &self.host });
            drop(permit);
        }
    }

    fn finish(mut self) {
        self.release();
        self.listener.on_event(&Event::CallEnd {
            elapsed: self.started.elapsed(),
        });
        self.done = true;
    }

    fn fail(mut self, error: &reqwest::Error) {
        self.release();
        self.listener.on_event(&Event::CallFailed {
            elapsed: self.started.elapsed(),
            error,
        });
        self.done = true;
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if !self.done {
            self.release();
            self.listener.on_event(&Event::CallEnd {
                elapsed: self.started.elapsed(),
            });
        }
    }
}

/// Response whose body reads are instrumented
///
/// The call ends when the body is read through [`bytes`](Self::bytes) or
/// [`text`](Self::text), or when the response is dropped or unwrapped.
pub struct InstrumentedResponse {
    inner: reqwest::Response,
    scope: CallScope,
}

impl InstrumentedResponse {
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    /// Read the full body
    pub async fn bytes(self) -> Result<Bytes, reqwest::Error> {
        let Self { inner, scope } = self;
        let listener = Arc::clone(&scope.listener);

        listener.on_event(&Event::ResponseBodyStart);
        match inner.bytes().await {
            Ok(body) => {
                listener.on_event(&Event::ResponseBodyEnd {
                    bytes: body.len() as u64,
                });
                scope.finish();
                Ok(body)
            }
            Err(error) => {
                listener.on_event(&Event::ResponseFailed { error: &error });
                scope.fail(&error);
                Err(error)
            }
        }
    }

    /// Read the full body as UTF-8, replacing invalid sequences
    pub async fn text(self) -> Result<String, reqwest::Error> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Give up instrumentation of the body and take the raw response
    pub fn into_inner(self) -> reqwest::Response {
        let Self { inner, scope } = self;
        scope.finish();
        inner
    }
}

impl fmt::Debug for InstrumentedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedResponse")
            .field("status", &self.inner.status())
            .field("url", self.inner.url())
            .finish_non_exhaustive()
    }
}

/// Builder for [`InstrumentedClient`]
pub struct InstrumentedClientBuilder {
    registry: Arc<MeterRegistry>,
    prefix: String,
    tags: Tags,
    include_host_tag: bool,
    url_mapper: UrlMapper,
    request_tag_keys: Vec<String>,
    durations: DistributionConfig,
    delegates: Vec<Arc<dyn EventListener>>,
    client_builder: reqwest::ClientBuilder,
    resolver: Option<Arc<dyn Resolve>>,
    cache: Option<Arc<dyn CacheStats>>,
    pool_max_idle_per_host: usize,
    max_requests: usize,
    max_requests_per_host: usize,
}

impl InstrumentedClientBuilder {
    pub fn new(registry: Arc<MeterRegistry>) -> Self {
        Self {
            registry,
            prefix: names::DEFAULT_PREFIX.to_string(),
            tags: Tags::empty(),
            include_host_tag: true,
            url_mapper: UrlMapper::default(),
            request_tag_keys: Vec::new(),
            durations: DistributionConfig::durations(),
            delegates: Vec::new(),
            client_builder: reqwest::Client::builder(),
            resolver: None,
            cache: None,
            pool_max_idle_per_host: dispatcher::DEFAULT_MAX_REQUESTS_PER_HOST,
            max_requests: dispatcher::DEFAULT_MAX_REQUESTS,
            max_requests_per_host: dispatcher::DEFAULT_MAX_REQUESTS_PER_HOST,
        }
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Extra tags applied to every meter the client registers
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn include_host_tag(mut self, include: bool) -> Self {
        self.include_host_tag = include;
        self
    }

    pub fn url_mapper(mut self, mapper: UrlMapper) -> Self {
        self.url_mapper = mapper;
        self
    }

    /// Request headers copied into request timer tags
    pub fn request_tag_keys(mut self, keys: Vec<String>) -> Self {
        self.request_tag_keys = keys;
        self
    }

    pub fn durations(mut self, durations: DistributionConfig) -> Self {
        self.durations = durations;
        self
    }

    /// Listener receiving every lifecycle event after it is recorded
    pub fn delegate(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.delegates.push(listener);
        self
    }

    /// Preconfigured reqwest builder (timeouts, TLS, proxies)
    pub fn client_builder(mut self, builder: reqwest::ClientBuilder) -> Self {
        self.client_builder = builder;
        self
    }

    /// Resolver to wrap instead of the system resolver
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Response cache to expose through the cache gauges
    pub fn cache(mut self, cache: Arc<dyn CacheStats>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    pub fn max_requests(mut self, max: usize) -> Self {
        self.max_requests = max;
        self
    }

    pub fn max_requests_per_host(mut self, max: usize) -> Self {
        self.max_requests_per_host = max;
        self
    }

    /// Register all meters and build the client
    ///
    /// # Errors
    ///
    /// - `AppError::Metrics` if a meter name is already registered with a
    ///   different kind or label set
    /// - `AppError::HttpClient` if reqwest rejects the client configuration
    pub fn build(self) -> AppResult<InstrumentedClient> {
        let registry = self.registry;
        let prefix = self.prefix;

        let listener: Arc<dyn EventListener> = Arc::new(InstrumentedEventListener::new(
            &registry,
            &prefix,
            &self.tags,
            &self.durations,
            self.delegates,
        )?);

        let connections = Arc::new(ConnectionStats::new(self.pool_max_idle_per_host));
        let dispatcher = Arc::new(Dispatcher::new(
            self.max_requests,
            self.max_requests_per_host,
        ));

        let resolver = match self.resolver {
            Some(inner) => InstrumentedResolver::new(inner, Arc::clone(&listener)),
            None => InstrumentedResolver::system(Arc::clone(&listener)),
        };

        let raw = self
            .client_builder
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .dns_resolver(Arc::new(resolver))
            .connector_layer(ConnectLayer::new(
                Arc::clone(&listener),
                Arc::clone(&connections),
            ))
            .build()?;

        let interceptor = InstrumentedLayer::new(InterceptorMetrics::new(
            Arc::clone(&registry),
            &prefix,
            self.tags.clone(),
            self.durations.clone(),
        )?);
        let request_timer = RequestTimerLayer::new(
            Arc::clone(&registry),
            RequestTimerConfig {
                prefix: prefix.clone(),
                extra_tags: self.tags.clone(),
                include_host_tag: self.include_host_tag,
                url_mapper: self.url_mapper,
                request_tag_keys: self.request_tag_keys,
                durations: self.durations,
            },
        );

        let stack = ServiceBuilder::new()
            .layer(interceptor)
            .layer(request_timer)
            .service(raw.clone());

        DispatcherMetrics::new(dispatcher.clone(), &prefix, self.tags.clone())
            .bind_to(&registry)?;
        ConnectionPoolMetrics::new(connections.clone(), &prefix, self.tags.clone())
            .bind_to(&registry)?;
        if let Some(cache) = self.cache {
            CacheMetrics::new(cache, &prefix, self.tags.clone()).bind_to(&registry)?;
        }

        tracing::info!(
            prefix = %prefix,
            max_requests = dispatcher.max_requests(),
            "Instrumented HTTP client ready"
        );

        Ok(InstrumentedClient {
            raw,
            stack,
            listener,
            dispatcher,
            connections,
            registry,
            prefix,
        })
    }
}
