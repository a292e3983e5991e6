//! Application state shared across handlers.

use std::sync::Arc;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;

use voxline_config::Settings;
use voxline_core::{HealthProbe, SystemServices};
use voxline_records::SupabaseRecords;

use crate::telephony::SignalWireClient;

/// Probes for the three cognitive collaborators, reported by the health
/// endpoint.
#[derive(Clone)]
pub struct HealthProbes {
    pub asr: Arc<dyn HealthProbe>,
    pub llm: Arc<dyn HealthProbe>,
    pub tts: Arc<dyn HealthProbe>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub services: SystemServices,
    /// Management-storage reads (agents, phone-number routing).
    pub records: Arc<SupabaseRecords>,
    pub telephony: Arc<SignalWireClient>,
    pub probes: HealthProbes,
    /// Prometheus render handle; `None` when no recorder could be installed.
    pub metrics: Option<PrometheusHandle>,
    /// Live media-session tasks keyed by call id. One session per call
    /// identifier; a webhook replay while a session is live is a no-op.
    pub sessions: Arc<DashMap<String, JoinHandle<()>>>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        services: SystemServices,
        records: Arc<SupabaseRecords>,
        telephony: Arc<SignalWireClient>,
        probes: HealthProbes,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings,
            services,
            records,
            telephony,
            probes,
            metrics,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Registers a call, refusing duplicates. Returns false when a session
    /// already exists for the id (creating a second session per call is a
    /// bug; webhook replays must not do it).
    pub fn register_session(&self, call_id: &str, handle: JoinHandle<()>) -> bool {
        match self.sessions.entry(call_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                handle.abort();
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
        }
    }

    pub fn unregister_session(&self, call_id: &str) {
        self.sessions.remove(call_id);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
