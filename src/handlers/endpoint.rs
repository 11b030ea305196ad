//! Flattened metrics read endpoint

use axum::{Json, extract::State};

use crate::exporter::Snapshot;
use crate::handlers::AppState;

/// Route of the snapshot endpoint
pub const PATH: &str = "/actuator/callmeter";

/// Returns the flattened snapshot of every meter under the configured prefix
///
/// ```bash
/// curl http://localhost:9464/actuator/callmeter
/// {"client":"reqwest","prefix":"callmeter","metrics":{"callmeter.calls.end":3.0, ...}}
/// ```
pub async fn handler(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.exporter().read())
}
