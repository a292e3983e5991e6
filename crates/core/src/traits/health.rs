//! Dependency health probing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Health of one external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Down,
}

/// A pingable external service.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn check(&self) -> ServiceHealth;
}
