//! Health check.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use voxline_core::{HealthProbe, ServiceHealth};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub services: ServiceStatuses,
}

#[derive(Serialize)]
pub struct ServiceStatuses {
    pub transport: ServiceHealth,
    pub asr: ServiceHealth,
    pub llm: ServiceHealth,
    pub tts: ServiceHealth,
}

/// Pings each external cognitive service and reports per-dependency status.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (asr, llm, tts) = tokio::join!(
        state.probes.asr.check(),
        state.probes.llm.check(),
        state.probes.tts.check(),
    );

    let status = overall_status(&[asr, llm, tts]);

    Json(HealthResponse {
        status,
        active_sessions: state.active_sessions(),
        services: ServiceStatuses {
            // This process is serving the request, so its transport is up.
            transport: ServiceHealth::Healthy,
            asr,
            llm,
            tts,
        },
    })
}

fn overall_status(statuses: &[ServiceHealth]) -> &'static str {
    if statuses.iter().any(|s| *s == ServiceHealth::Down) {
        "down"
    } else if statuses.iter().any(|s| *s == ServiceHealth::Degraded) {
        "degraded"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_dependency_wins() {
        use ServiceHealth::*;
        assert_eq!(overall_status(&[Healthy, Healthy, Healthy]), "ok");
        assert_eq!(overall_status(&[Healthy, Degraded, Healthy]), "degraded");
        assert_eq!(overall_status(&[Degraded, Down, Healthy]), "down");
    }
}
