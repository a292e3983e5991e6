//! HTTP control surface for voxline
//!
//! Three endpoints: the telephony webhook that brings calls up and down,
//! the outbound-call trigger, and the health check. Everything per-call
//! happens in `voxline-session`; this crate resolves agents, seeds the
//! session store, opens the media transport, and tracks live sessions so
//! that exactly one exists per call identifier.

mod error;
mod health;
mod http;
mod metrics;
mod outbound;
mod state;
mod telephony;
mod webhook;

pub use error::ApiError;
pub use http::create_router;
pub use metrics::init_metrics;
pub use state::{AppState, HealthProbes};
pub use telephony::SignalWireClient;
