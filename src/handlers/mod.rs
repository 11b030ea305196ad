//! HTTP read endpoints for callmeter

use crate::client::InstrumentedClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::exporter::MetricsExporter;
use crate::metrics::MeterRegistry;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod endpoint;
pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// All fields are Arc'd (or Arc-backed) for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<MeterRegistry>,
    exporter: MetricsExporter,
    client: InstrumentedClient,
}

impl AppState {
    /// Create the registry, the instrumented client and the exporter
    ///
    /// # Errors
    ///
    /// Returns an error if meter registration or client construction fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        Self::with_registry(config, Arc::new(MeterRegistry::new()))
    }

    /// Same as [`AppState::new`] over a registry owned by the host
    pub fn with_registry(config: Arc<Config>, registry: Arc<MeterRegistry>) -> AppResult<Self> {
        let client = InstrumentedClient::from_config(&config, Arc::clone(&registry))?;
        let exporter = MetricsExporter::new(Arc::clone(&registry), config.metrics.prefix.clone());

        Ok(Self {
            config,
            registry,
            exporter,
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    pub fn exporter(&self) -> &MetricsExporter {
        &self.exporter
    }

    pub fn client(&self) -> &InstrumentedClient {
        &self.client
    }
}

/// Build the server router with request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route(endpoint::PATH, get(endpoint::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
