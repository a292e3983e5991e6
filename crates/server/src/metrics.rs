//! Prometheus metrics endpoint.

use axum::extract::State;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Installs the global Prometheus recorder. Counters recorded anywhere in
/// the pipeline (barge-ins, dropped interims, log retries, task leaks) are
/// rendered through the returned handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install metrics recorder");
            None
        }
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
    match &state.metrics {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
