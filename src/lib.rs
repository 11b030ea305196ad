//! callmeter - Metrics instrumentation for outbound HTTP calls
//!
//! This library wraps a `reqwest` client with call lifecycle metrics
//! (submitted, running, completed and failed requests, durations, per-phase
//! events, dispatcher, connection pool and cache gauges) and exposes them as
//! Prometheus text and as a flattened snapshot.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod exporter;
pub mod handlers;
pub mod metrics;
pub mod telemetry;
