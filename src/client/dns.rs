//! DNS resolution hooks
//!
//! [`InstrumentedResolver`] plugs into `ClientBuilder::dns_resolver` and fires
//! DNS start/end/failed events around an inner resolver. Resolution itself
//! stays with the inner resolver (the tokio system resolver by default).

use super::events::Event;
use super::listener::EventListener;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Resolver backed by `tokio::net::lookup_host`
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), 0))
                .await?
                .collect();
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, BoxError>(addrs)
        })
    }
}

/// Resolver wrapper emitting DNS lifecycle events
#[derive(Clone)]
pub struct InstrumentedResolver {
    inner: Arc<dyn Resolve>,
    listener: Arc<dyn EventListener>,
}

impl InstrumentedResolver {
    pub fn new(inner: Arc<dyn Resolve>, listener: Arc<dyn EventListener>) -> Self {
        Self { inner, listener }
    }

    /// Wrap the system resolver
    pub fn system(listener: Arc<dyn EventListener>) -> Self {
        Self::new(Arc::new(SystemResolver), listener)
    }
}

impl Resolve for InstrumentedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let inner = Arc::clone(&self.inner);
        let listener = Arc::clone(&self.listener);

        Box::pin(async move {
            let host = name.as_str().to_string();
            listener.on_event(&Event::DnsStart { host: &host });
            let started = Instant::now();

            match inner.resolve(name).await {
                Ok(addrs) => {
                    let addrs: Vec<SocketAddr> = addrs.collect();
                    listener.on_event(&Event::DnsEnd {
                        host: &host,
                        addresses: addrs.len(),
                        elapsed: started.elapsed(),
                    });
                    let addrs: Addrs = Box::new(addrs.into_iter());
                    Ok(addrs)
                }
                Err(error) => {
                    tracing::debug!(host = %host, error = %error, "DNS resolution failed");
                    listener.on_event(&Event::DnsFailed {
                        host: &host,
                        elapsed: started.elapsed(),
                        error: &*error,
                    });
                    Err(error)
                }
            }
        })
    }
}
