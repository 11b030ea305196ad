//! Metric name suffixes
//!
//! Every meter name is `<prefix><suffix>`. The default prefix is
//! [`DEFAULT_PREFIX`]; pool, cache and dispatcher gauges live under
//! `<prefix>` + [`POOL_SEGMENT`].

/// Prefix used for all meter names unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "callmeter";

/// Segment appended to the prefix for pool, cache and dispatcher gauges.
pub const POOL_SEGMENT: &str = ".pool";

// Interceptor
pub const NETWORK_REQUESTS_SUBMITTED: &str = ".network.requests.submitted";
pub const NETWORK_REQUESTS_RUNNING: &str = ".network.requests.running";
pub const NETWORK_REQUESTS_COMPLETED: &str = ".network.requests.completed";
pub const NETWORK_REQUESTS_FAILED: &str = ".network.requests.failed";
pub const NETWORK_REQUESTS_DURATION: &str = ".network.requests.duration";
/// Followed by `.<host>`; one timer per destination host.
pub const NETWORK_DESTINATIONS: &str = ".network.destinations";

// Request timer
pub const REQUESTS: &str = ".requests";

// Calls
pub const CALLS_STARTED: &str = ".calls.started";
pub const CALLS_END: &str = ".calls.end";
pub const CALLS_FAILED: &str = ".calls.failed";
pub const CALLS_DURATION: &str = ".calls.duration";
pub const CALLS_TIMEOUT: &str = ".calls.timeout";

// DNS
pub const DNS_STARTED: &str = ".dns.started";
pub const DNS_END: &str = ".dns.end";
pub const DNS_FAILED: &str = ".dns.failed";
pub const DNS_DURATION: &str = ".dns.duration";

// Connections
pub const CONNECTIONS_STARTED: &str = ".connections.started";
pub const CONNECTIONS_END: &str = ".connections.end";
pub const CONNECTIONS_FAILED: &str = ".connections.failed";
pub const CONNECTIONS_DURATION: &str = ".connections.duration";
pub const CONNECTIONS_ACQUIRED: &str = ".connections.acquired";
pub const CONNECTIONS_RELEASED: &str = ".connections.released";
pub const CONNECTIONS_TIMEOUT: &str = ".connections.timeout";

// Request phases
pub const REQUESTS_HEADERS_STARTED: &str = ".requests.headers.started";
pub const REQUESTS_HEADERS_END: &str = ".requests.headers.end";
pub const REQUESTS_BODY_STARTED: &str = ".requests.body.started";
pub const REQUESTS_BODY_END: &str = ".requests.body.end";
pub const REQUESTS_BODY_BYTES: &str = ".requests.body.bytes";
pub const REQUESTS_FAILED: &str = ".requests.failed";

// Response phases
pub const RESPONSES_HEADERS_STARTED: &str = ".responses.headers.started";
pub const RESPONSES_HEADERS_END: &str = ".responses.headers.end";
pub const RESPONSES_BODY_STARTED: &str = ".responses.body.started";
pub const RESPONSES_BODY_END: &str = ".responses.body.end";
pub const RESPONSES_BODY_BYTES: &str = ".responses.body.bytes";
pub const RESPONSES_FAILED: &str = ".responses.failed";

// Dispatcher (under the pool segment)
pub const DISPATCHER_MAX_REQUESTS: &str = ".dispatcher.max.requests";
pub const DISPATCHER_MAX_REQUESTS_PERHOST: &str = ".dispatcher.max.requests.perhost";
pub const DISPATCHER_QUEUED_CALLS_COUNT: &str = ".dispatcher.queued.calls.count";
pub const DISPATCHER_RUNNING_CALLS_COUNT: &str = ".dispatcher.running.calls.count";

// Cache (under the pool segment)
pub const CACHE_REQUEST_COUNT: &str = ".cache.request.count";
pub const CACHE_HIT_COUNT: &str = ".cache.hit.count";
pub const CACHE_NETWORK_COUNT: &str = ".cache.network.count";
pub const CACHE_WRITE_SUCCESS_COUNT: &str = ".cache.write.success.count";
pub const CACHE_WRITE_ABORT_COUNT: &str = ".cache.write.abort.count";
pub const CACHE_CURRENT_SIZE: &str = ".cache.current.size";
pub const CACHE_MAX_SIZE: &str = ".cache.max.size";

// Connection pool (under the pool segment)
pub const POOL_CONNECTION_OPENED: &str = ".connection.opened";
pub const POOL_CONNECTION_FAILED: &str = ".connection.failed";
pub const POOL_CONNECTION_LIMIT: &str = ".connection.limit";

// Self-monitoring
pub const METRICS_RECORDING_FAILURES: &str = ".metrics.recording.failures";

/// Join a prefix and a suffix into a full meter name.
pub fn join(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{suffix}")
}

/// Pool prefix derived from a base prefix (`callmeter` -> `callmeter.pool`).
pub fn pool_prefix(prefix: &str) -> String {
    join(prefix, POOL_SEGMENT)
}
