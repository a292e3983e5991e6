//! Router assembly.

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::health::health_check;
use crate::metrics::metrics_handler;
use crate::outbound::trigger_call;
use crate::state::AppState;
use crate::webhook::telephony_webhook;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.settings.server.cors_origins);

    Router::new()
        .route("/telephony/webhook", post(telephony_webhook))
        .route("/calls", post(trigger_call))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin = %origin, "invalid CORS origin ignored");
                None
            })
        })
        .collect();

    CorsLayer::new().allow_origin(parsed).allow_headers(Any)
}
