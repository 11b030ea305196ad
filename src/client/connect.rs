//! Connection establishment hooks
//!
//! [`ConnectLayer`] is installed with `ClientBuilder::connector_layer`. It
//! wraps every new transport connection attempt made by the connection pool,
//! emitting connect start/end/failed events and feeding [`ConnectionStats`].
//! Reused pooled connections never pass through it.

use super::events::Event;
use super::listener::EventListener;
use crate::metrics::binders::ConnectionPoolStats;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Totals of connection attempts made by one client
#[derive(Debug, Default)]
pub struct ConnectionStats {
    opened: AtomicU64,
    failed: AtomicU64,
    idle_per_host_limit: usize,
}

impl ConnectionStats {
    pub fn new(idle_per_host_limit: usize) -> Self {
        Self {
            idle_per_host_limit,
            ..Self::default()
        }
    }

    pub fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

impl ConnectionPoolStats for ConnectionStats {
    fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn limit(&self) -> usize {
        self.idle_per_host_limit
    }
}

/// Layer wrapping the client's connector
#[derive(Clone)]
pub struct ConnectLayer {
    listener: Arc<dyn EventListener>,
    stats: Arc<ConnectionStats>,
}

impl ConnectLayer {
    pub fn new(listener: Arc<dyn EventListener>, stats: Arc<ConnectionStats>) -> Self {
        Self { listener, stats }
    }
}

impl<S> Layer<S> for ConnectLayer {
    type Service = ConnectService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectService {
            inner,
            listener: Arc::clone(&self.listener),
            stats: Arc::clone(&self.stats),
        }
    }
}

#[derive(Clone)]
pub struct ConnectService<S> {
    inner: S,
    listener: Arc<dyn EventListener>,
    stats: Arc<ConnectionStats>,
}

impl<S, R> Service<R> for ConnectService<S>
where
    S: Service<R, Error = BoxError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        let listener = Arc::clone(&self.listener);
        let stats = Arc::clone(&self.stats);

        listener.on_event(&Event::ConnectStart);
        let started = Instant::now();
        let connecting = self.inner.call(request);

        Box::pin(async move {
            match connecting.await {
                Ok(conn) => {
                    stats.record_opened();
                    listener.on_event(&Event::ConnectEnd {
                        elapsed: started.elapsed(),
                    });
                    Ok(conn)
                }
                Err(error) => {
                    stats.record_failed();
                    tracing::debug!(error = %error, "Connection attempt failed");
                    listener.on_event(&Event::ConnectFailed {
                        elapsed: started.elapsed(),
                        error: &*error,
                    });
                    Err(error)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::events::EventKind;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn recorder() -> (Arc<Mutex<Vec<EventKind>>>, Arc<dyn EventListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn EventListener> = Arc::new(move |event: &Event<'_>| {
            sink.lock().unwrap().push(event.kind());
        });
        (seen, listener)
    }

    #[tokio::test]
    async fn test_successful_connect_counts_opened() {
        let (seen, listener) = recorder();
        let stats = Arc::new(ConnectionStats::new(5));
        let inner = tower::service_fn(|_: &'static str| async { Ok::<_, BoxError>(42u8) });
        let service = ConnectLayer::new(listener, Arc::clone(&stats)).layer(inner);

        let conn = service.oneshot("http://example.com").await.unwrap();

        assert_eq!(conn, 42);
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.limit(), 5);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::ConnectStart, EventKind::ConnectEnd]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_counts_failed_and_passes_error_through() {
        let (seen, listener) = recorder();
        let stats = Arc::new(ConnectionStats::new(5));
        let inner = tower::service_fn(|_: &'static str| async {
            Err::<u8, BoxError>("connection refused".into())
        });
        let service = ConnectLayer::new(listener, Arc::clone(&stats)).layer(inner);

        let err = service.oneshot("http://example.com").await.unwrap_err();

        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(stats.failed(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::ConnectStart, EventKind::ConnectFailed]
        );
    }
}
