//! Call bring-up webhook.
//!
//! The telephony provider posts call events here. `answered` resolves the
//! agent, seeds the session store, opens the media transport and starts the
//! session; `ended` finalizes whatever the media task has not. Unroutable
//! calls answer 200 with an explanatory body: failing the webhook makes the
//! provider retry, which is worse than a missed call.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use voxline_core::{
    AgentConfig, CallDirection, CallLog, CallRecord, CallStatus, SessionField, SessionStore,
    SystemServices,
};
use voxline_session::{run_call, CallSetup};
use voxline_transport::{connect_media, Codec};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub call_id: String,
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub to_number: String,
    #[serde(default)]
    pub media_url: Option<String>,
    pub state: String,
    #[serde(default)]
    pub direction: Option<CallDirection>,
    /// Opaque JSON string round-tripped through the provider; carries
    /// `ai_agent_id` (and custom variables) for outbound calls.
    #[serde(default)]
    pub client_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientState {
    ai_agent_id: Option<String>,
}

pub async fn telephony_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!(call_id = %payload.call_id, state = %payload.state,
        direction = ?payload.direction, "telephony webhook received");

    match payload.state.as_str() {
        "answered" => handle_answered(state, payload).await,
        "ended" => handle_ended(state, payload).await,
        other => {
            tracing::debug!(call_id = %payload.call_id, state = %other, "ignoring webhook state");
            Ok(Json(json!({})))
        }
    }
}

async fn handle_answered(
    state: AppState,
    payload: WebhookPayload,
) -> Result<Json<serde_json::Value>, ApiError> {
    let direction = payload.direction.unwrap_or(CallDirection::Inbound);

    let Some(media_url) = payload.media_url.clone() else {
        tracing::warn!(call_id = %payload.call_id, "answered webhook without media url");
        return Ok(Json(json!({"message": "No media url"})));
    };

    let Some(agent_id) = resolve_agent_id(&state, &payload, direction).await? else {
        tracing::warn!(call_id = %payload.call_id, to_number = %payload.to_number,
            "no agent routes this call");
        return Ok(Json(json!({"message": "No agent found"})));
    };

    let agent = match state.records.get_agent(&agent_id).await {
        Ok(Some(agent)) if agent.is_active => agent,
        Ok(_) => {
            tracing::warn!(call_id = %payload.call_id, agent_id = %agent_id,
                "agent missing or inactive");
            return Ok(Json(json!({"message": "Agent not found or inactive"})));
        }
        Err(e) => return Err(ApiError::internal(e.to_string())),
    };

    if state.sessions.contains_key(&payload.call_id) {
        tracing::warn!(call_id = %payload.call_id, "session already active, ignoring replay");
        return Ok(Json(json!({"message": "Call already active"})));
    }

    let record = CallRecord::new(
        payload.call_id.clone(),
        direction,
        payload.from_number.clone(),
        payload.to_number.clone(),
        agent.id.clone(),
    );

    // Create the call record before the media session opens, then seed the
    // store so a webhook landing on another node can see this call.
    if let Err(e) = state.services.call_log.upsert_call(&record).await {
        tracing::warn!(call_id = %record.id, error = %e, "initial call record write failed");
    }
    seed_store(&state.services, &record.id, &agent).await;

    let setup = CallSetup {
        record,
        stream_sid: Some(payload.call_id.clone()),
        agent,
    };
    let handle = spawn_media_session(state.clone(), setup, media_url);
    if !state.register_session(&payload.call_id, handle) {
        return Ok(Json(json!({"message": "Call already active"})));
    }

    Ok(Json(json!({})))
}

async fn resolve_agent_id(
    state: &AppState,
    payload: &WebhookPayload,
    direction: CallDirection,
) -> Result<Option<String>, ApiError> {
    match direction {
        CallDirection::Inbound => state
            .records
            .get_agent_for_number(&payload.to_number)
            .await
            .map_err(|e| ApiError::internal(e.to_string())),
        CallDirection::Outbound => Ok(payload
            .client_state
            .as_deref()
            .and_then(|raw| parse_client_state(&payload.call_id, raw))),
    }
}

/// Pulls the agent reference out of the provider-echoed `client_state`.
/// Malformed JSON is tolerated: logged and treated as unresolvable.
fn parse_client_state(call_id: &str, raw: &str) -> Option<String> {
    match serde_json::from_str::<ClientState>(raw) {
        Ok(client_state) => client_state.ai_agent_id,
        Err(e) => {
            tracing::warn!(call_id = %call_id, error = %e,
                "invalid client_state on outbound call");
            None
        }
    }
}

async fn seed_store(services: &SystemServices, call_id: &str, agent: &AgentConfig) {
    let writes: [(SessionField, serde_json::Value); 4] = [
        (
            SessionField::AgentConfig,
            serde_json::to_value(agent).unwrap_or_default(),
        ),
        (SessionField::ConversationMemory, json!([])),
        (SessionField::IsAiSpeaking, json!(false)),
        (SessionField::CurrentStatus, json!("answered")),
    ];
    for (field, value) in writes {
        if let Err(e) = services
            .store
            .set(call_id, field, value, field.default_ttl())
            .await
        {
            tracing::warn!(call_id = %call_id, field = field.as_str(), error = %e,
                "session store seed failed, continuing");
        }
    }
}

fn spawn_media_session(
    state: AppState,
    setup: CallSetup,
    media_url: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let call_id = setup.record.id.clone();
        let codec = Codec::linear16(
            state.settings.media.sample_rate,
            state.settings.media.channels,
        );

        match connect_media(&media_url, codec).await {
            Ok((sink, source)) => {
                run_call(setup, state.services.clone(), &state.settings, source, sink).await;
            }
            Err(e) => {
                tracing::error!(call_id = %call_id, error = %e, "media transport connect failed");
                let mut record = setup.record;
                record.finalize(CallStatus::Failed);
                if let Err(e) = state.services.call_log.upsert_call(&record).await {
                    tracing::warn!(call_id = %call_id, error = %e, "failed-call record write failed");
                }
                if let Err(e) = state.services.store.clear(&call_id).await {
                    tracing::warn!(call_id = %call_id, error = %e, "session store cleanup failed");
                }
            }
        }

        state.unregister_session(&call_id);
    })
}

async fn handle_ended(
    state: AppState,
    payload: WebhookPayload,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.sessions.contains_key(&payload.call_id) {
        // The transport is about to close; the live session finalizes the
        // record and clears the store itself.
        tracing::debug!(call_id = %payload.call_id, "ended webhook for live session");
        return Ok(Json(json!({})));
    }

    // No local session (other node, or teardown already done): finalize from
    // what the webhook and the store still know.
    let agent_id = match state
        .services
        .store
        .get(&payload.call_id, SessionField::AgentConfig)
        .await
    {
        Ok(Some(value)) => value
            .get("id")
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };

    let mut record = CallRecord::new(
        payload.call_id.clone(),
        payload.direction.unwrap_or(CallDirection::Inbound),
        payload.from_number.clone(),
        payload.to_number.clone(),
        agent_id,
    );
    record.finalize(CallStatus::EndedByPeer);
    if let Err(e) = state.services.call_log.upsert_call(&record).await {
        tracing::warn!(call_id = %record.id, error = %e, "ended-call record write failed");
    }
    if let Err(e) = state.services.store.clear(&payload.call_id).await {
        tracing::warn!(call_id = %payload.call_id, error = %e, "session store cleanup failed");
    }

    Ok(Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_state_carries_the_agent_reference() {
        let parsed = parse_client_state(
            "c1",
            r#"{"ai_agent_id": "agent-7", "custom_variables": {"campaign": "q3"}}"#,
        );
        assert_eq!(parsed.as_deref(), Some("agent-7"));
    }

    #[test]
    fn malformed_client_state_is_unresolvable_not_fatal() {
        assert_eq!(parse_client_state("c1", "not json"), None);
        assert_eq!(parse_client_state("c1", "{}"), None);
    }

    #[test]
    fn webhook_payload_accepts_minimal_body() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"call_id": "c1", "state": "ended"}"#,
        )
        .unwrap();
        assert_eq!(payload.state, "ended");
        assert!(payload.media_url.is_none());
        assert!(payload.direction.is_none());
    }
}
