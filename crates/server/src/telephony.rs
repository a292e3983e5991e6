//! Telephony provider client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use voxline_config::TelephonySettings;

/// Client for the SignalWire calling API.
pub struct SignalWireClient {
    settings: TelephonySettings,
    client: Client,
}

/// Provider errors, mapped onto webhook-facing status codes by the caller.
#[derive(Debug, thiserror::Error)]
pub enum TelephonyError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[derive(Serialize)]
struct CreateCallRequest<'a> {
    to: &'a str,
    from: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_state: Option<String>,
}

#[derive(Deserialize)]
struct CreateCallResponse {
    #[serde(alias = "id")]
    call_id: Option<String>,
}

impl SignalWireClient {
    pub fn new(settings: TelephonySettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { settings, client }
    }

    /// Initiates an outbound call. `client_state` is an opaque JSON string
    /// the provider echoes back on webhooks; it carries the agent reference.
    pub async fn create_call(
        &self,
        from_number: &str,
        to_number: &str,
        webhook_url: &str,
        client_state: Option<String>,
    ) -> Result<String, TelephonyError> {
        let url = format!("{}/api/calling/calls", self.settings.space_url);
        let body = CreateCallRequest {
            to: to_number,
            from: from_number,
            url: webhook_url,
            client_state,
        };

        let response = self
            .client
            .post(url)
            .basic_auth(&self.settings.project_id, Some(&self.settings.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| TelephonyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Request(format!("HTTP {status}: {body}")));
        }

        let parsed: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| TelephonyError::InvalidResponse(e.to_string()))?;
        parsed
            .call_id
            .ok_or_else(|| TelephonyError::InvalidResponse("missing call id".to_string()))
    }
}
