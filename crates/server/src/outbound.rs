//! Outbound call initiation.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerCallRequest {
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub to_number: String,
    #[serde(default)]
    pub ai_agent_id: String,
    #[serde(default)]
    pub custom_variables: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TriggerCallResponse {
    pub call_id: String,
    pub status: String,
}

/// Programmatically initiates an outbound call. The agent reference rides
/// in `client_state`, which the provider echoes back on the `answered`
/// webhook.
pub async fn trigger_call(
    State(state): State<AppState>,
    Json(request): Json<TriggerCallRequest>,
) -> Result<Json<TriggerCallResponse>, ApiError> {
    if request.from_number.is_empty() || request.to_number.is_empty() || request.ai_agent_id.is_empty()
    {
        return Err(ApiError::bad_request(
            "missing required fields: from_number, to_number, ai_agent_id",
        ));
    }

    match state.records.get_agent(&request.ai_agent_id).await {
        Ok(Some(agent)) if agent.is_active => {}
        Ok(_) => {
            return Err(ApiError::not_found(format!(
                "agent {} not found or inactive",
                request.ai_agent_id
            )));
        }
        Err(e) => return Err(ApiError::internal(e.to_string())),
    }

    let mut client_state = json!({ "ai_agent_id": request.ai_agent_id });
    if let Some(variables) = &request.custom_variables {
        client_state["custom_variables"] = variables.clone();
    }

    let webhook_url = format!("{}/telephony/webhook", state.settings.server.public_url);
    let call_id = state
        .telephony
        .create_call(
            &request.from_number,
            &request.to_number,
            &webhook_url,
            Some(client_state.to_string()),
        )
        .await
        .map_err(|e| ApiError::internal(format!("failed to initiate call: {e}")))?;

    tracing::info!(call_id = %call_id, from = %request.from_number, to = %request.to_number,
        agent_id = %request.ai_agent_id, "outbound call initiated");

    Ok(Json(TriggerCallResponse {
        call_id,
        status: "initiated".to_string(),
    }))
}
