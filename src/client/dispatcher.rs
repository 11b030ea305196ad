//! Admission control for in-flight calls
//!
//! Calls wait for a per-host slot and then a global slot before they reach
//! the transport. Waiting calls count as queued, admitted calls as running.
//! Both counts are read live by the dispatcher gauges.

use crate::metrics::binders::DispatcherStats;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_MAX_REQUESTS: usize = 64;
pub const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 5;

#[derive(Debug)]
pub struct Dispatcher {
    max_requests: usize,
    max_requests_per_host: usize,
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    queued: AtomicUsize,
    running: AtomicUsize,
}

impl Dispatcher {
    /// Limits below 1 are raised to 1
    pub fn new(max_requests: usize, max_requests_per_host: usize) -> Self {
        let max_requests = max_requests.max(1);
        let max_requests_per_host = max_requests_per_host.max(1);
        Self {
            max_requests,
            max_requests_per_host,
            global: Arc::new(Semaphore::new(max_requests)),
            per_host: Mutex::new(HashMap::new()),
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
        }
    }

    /// Wait for a slot for a call to `host`
    ///
    /// Dropping the returned future while it waits removes the call from
    /// the queue; dropping the permit frees both slots.
    pub async fn acquire(self: &Arc<Self>, host: &str) -> DispatchPermit {
        let host_slots = self.host_semaphore(host);
        let queued = QueuedGuard::enter(&self.queued);

        // Semaphores are never closed, so acquisition only fails on shutdown
        let host_permit = host_slots.acquire_owned().await.ok();
        let global_permit = Arc::clone(&self.global).acquire_owned().await.ok();

        drop(queued);
        self.running.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(host, "Call admitted by dispatcher");

        DispatchPermit {
            dispatcher: Arc::clone(self),
            _host: host_permit,
            _global: global_permit,
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut per_host = self
            .per_host
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            per_host
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_requests_per_host))),
        )
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_MAX_REQUESTS_PER_HOST)
    }
}

impl DispatcherStats for Dispatcher {
    fn max_requests(&self) -> usize {
        self.max_requests
    }

    fn max_requests_per_host(&self) -> usize {
        self.max_requests_per_host
    }

    fn queued_calls_count(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    fn running_calls_count(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }
}

struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::Relaxed);
        Self(queued)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Admission of one call; releases its slots on drop
#[derive(Debug)]
pub struct DispatchPermit {
    dispatcher: Arc<Dispatcher>,
    _host: Option<OwnedSemaphorePermit>,
    _global: Option<OwnedSemaphorePermit>,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.dispatcher.running.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permit_tracks_running_count() {
        let dispatcher = Arc::new(Dispatcher::new(4, 2));
        let first = dispatcher.acquire("a.example").await;
        let second = dispatcher.acquire("b.example").await;
        assert_eq!(dispatcher.running_calls_count(), 2);
        assert_eq!(dispatcher.queued_calls_count(), 0);

        drop(first);
        assert_eq!(dispatcher.running_calls_count(), 1);
        drop(second);
        assert_eq!(dispatcher.running_calls_count(), 0);
    }

    #[tokio::test]
    async fn test_per_host_limit_queues_excess_calls() {
        let dispatcher = Arc::new(Dispatcher::new(10, 1));
        let held = dispatcher.acquire("api.example").await;

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.acquire("api.example").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.queued_calls_count(), 1);
        assert_eq!(dispatcher.running_calls_count(), 1);

        drop(held);
        let permit = waiter.await.unwrap();
        assert_eq!(dispatcher.queued_calls_count(), 0);
        assert_eq!(dispatcher.running_calls_count(), 1);
        drop(permit);
    }

    #[tokio::test]
    async fn test_other_hosts_are_not_blocked_by_per_host_limit() {
        let dispatcher = Arc::new(Dispatcher::new(10, 1));
        let _held = dispatcher.acquire("slow.example").await;

        let other = tokio::time::timeout(
            Duration::from_millis(100),
            dispatcher.acquire("fast.example"),
        )
        .await;
        assert!(other.is_ok(), "different host must get its own slot");
    }

    #[tokio::test]
    async fn test_cancelled_wait_leaves_queue() {
        let dispatcher = Arc::new(Dispatcher::new(1, 1));
        let _held = dispatcher.acquire("api.example").await;

        let waited =
            tokio::time::timeout(Duration::from_millis(20), dispatcher.acquire("api.example"))
                .await;
        assert!(waited.is_err());
        assert_eq!(dispatcher.queued_calls_count(), 0);
    }

    #[test]
    fn test_limits_are_at_least_one() {
        let dispatcher = Dispatcher::new(0, 0);
        assert_eq!(dispatcher.max_requests(), 1);
        assert_eq!(dispatcher.max_requests_per_host(), 1);
    }

    #[test]
    fn test_defaults() {
        let dispatcher = Dispatcher::default();
        assert_eq!(dispatcher.max_requests(), 64);
        assert_eq!(dispatcher.max_requests_per_host(), 5);
    }
}
