//! Gemini generateContent backend.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use voxline_config::LlmSettings;
use voxline_core::{
    ChatFailure, ChatMessage, ChatModel, ChatParams, ChatReply, ChatRole, ChatSession, HealthProbe,
    Result, ServiceHealth, TokenUsage, ToolInvocation,
};

/// Chat client for the Gemini generateContent API.
pub struct GeminiChat {
    settings: LlmSettings,
    client: Client,
}

impl GeminiChat {
    pub fn new(settings: LlmSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self { settings, client }
    }

    fn request_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.endpoint, self.settings.model
        )
    }

    fn build_request(session: &ChatSession, message: &str, params: ChatParams) -> GenerateRequest {
        let mut contents: Vec<Content> = session.history.iter().map(Content::from).collect();
        contents.push(Content {
            role: "user".to_string(),
            parts: vec![Part {
                text: Some(message.to_string()),
                function_call: None,
            }],
        });

        GenerateRequest {
            contents,
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: Some(session.system_prompt.clone()),
                    function_call: None,
                }],
            },
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        }
    }

    async fn request_once(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<ChatReply, ChatFailure> {
        let response = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", &self.settings.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ChatFailure::Transient(e.to_string())
                } else {
                    ChatFailure::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatFailure::Transient(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatFailure::Fatal(format!("HTTP {status}: {body}")));
        }

        let response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ChatFailure::Fatal(format!("invalid response: {e}")))?;

        parse_response(response)
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn start_chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<ChatSession> {
        Ok(ChatSession {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
        })
    }

    async fn send(
        &self,
        session: &mut ChatSession,
        message: &str,
        params: ChatParams,
    ) -> std::result::Result<ChatReply, ChatFailure> {
        let request = Self::build_request(session, message, params);

        let reply = match self.request_once(&request).await {
            Err(ChatFailure::Transient(first)) => {
                let backoff = Duration::from_millis(rand::thread_rng().gen_range(100..400));
                tracing::warn!(error = %first, backoff_ms = backoff.as_millis() as u64,
                    "transient language model error, retrying once");
                tokio::time::sleep(backoff).await;
                self.request_once(&request).await?
            }
            other => other?,
        };

        session.history.push(ChatMessage::user(message));
        session.history.push(ChatMessage::assistant(reply.text.clone()));
        Ok(reply)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[async_trait]
impl HealthProbe for GeminiChat {
    async fn check(&self) -> ServiceHealth {
        let url = format!("{}/v1beta/models", self.settings.endpoint);
        let probe = self
            .client
            .get(url)
            .header("x-goog-api-key", &self.settings.api_key)
            .send();
        match timeout(Duration::from_secs(3), probe).await {
            Ok(Ok(response)) if response.status().is_success() => ServiceHealth::Healthy,
            Ok(Ok(_)) => ServiceHealth::Degraded,
            _ => ServiceHealth::Down,
        }
    }
}

fn parse_response(response: GenerateResponse) -> std::result::Result<ChatReply, ChatFailure> {
    if let Some(feedback) = &response.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Err(ChatFailure::PolicyRefusal);
        }
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ChatFailure::Empty)?;

    if candidate
        .finish_reason
        .as_deref()
        .is_some_and(|reason| reason.eq_ignore_ascii_case("safety"))
    {
        return Err(ChatFailure::PolicyRefusal);
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(content) = candidate.content {
        for part in content.parts {
            if let Some(fragment) = part.text {
                text.push_str(&fragment);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolInvocation {
                    name: call.name,
                    arguments: call.args,
                });
            }
        }
    }

    let text = text.trim().to_string();
    if text.is_empty() && tool_calls.is_empty() {
        return Err(ChatFailure::Empty);
    }

    let usage = response.usage_metadata.map(|u| TokenUsage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
    });

    Ok(ChatReply {
        text,
        tool_calls,
        usage,
    })
}

// Wire types.

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl From<&ChatMessage> for Content {
    fn from(message: &ChatMessage) -> Self {
        Content {
            role: match message.role {
                ChatRole::User => "user".to_string(),
                ChatRole::Assistant => "model".to_string(),
            },
            parts: vec![Part {
                text: Some(message.text.clone()),
                function_call: None,
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_from(raw: &str) -> GenerateResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parses_text_and_usage() {
        let reply = parse_response(response_from(
            r#"{
                "candidates": [{"content": {"role": "model", "parts": [{"text": "It is sunny."}]},
                                "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 42, "candidatesTokenCount": 7}
            }"#,
        ))
        .unwrap();
        assert_eq!(reply.text, "It is sunny.");
        let usage = reply.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 42);
        assert_eq!(usage.completion_tokens, 7);
    }

    #[test]
    fn blocked_prompt_is_policy_refusal() {
        let result = parse_response(response_from(
            r#"{"promptFeedback": {"blockReason": "SAFETY"}, "candidates": []}"#,
        ));
        assert_eq!(result.unwrap_err(), ChatFailure::PolicyRefusal);

        let result = parse_response(response_from(
            r#"{"candidates": [{"finishReason": "SAFETY"}]}"#,
        ));
        assert_eq!(result.unwrap_err(), ChatFailure::PolicyRefusal);
    }

    #[test]
    fn empty_completion_is_classified() {
        let result = parse_response(response_from(r#"{"candidates": []}"#));
        assert_eq!(result.unwrap_err(), ChatFailure::Empty);

        let result = parse_response(response_from(
            r#"{"candidates": [{"content": {"parts": [{"text": "   "}]}}]}"#,
        ));
        assert_eq!(result.unwrap_err(), ChatFailure::Empty);
    }

    #[test]
    fn tool_calls_are_surfaced() {
        let reply = parse_response(response_from(
            r#"{"candidates": [{"content": {"parts": [
                {"text": "Let me check."},
                {"functionCall": {"name": "lookup_weather", "args": {"city": "Austin"}}}
            ]}}]}"#,
        ))
        .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "lookup_weather");
    }

    #[test]
    fn history_maps_to_wire_roles() {
        let session = ChatSession {
            system_prompt: "be brief".to_string(),
            history: vec![
                ChatMessage::assistant("Hello"),
                ChatMessage::user("what is the weather"),
            ],
        };
        let request = GeminiChat::build_request(
            &session,
            "and tomorrow?",
            ChatParams {
                temperature: 0.7,
                max_tokens: 128,
            },
        );
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[0].role, "model");
        assert_eq!(request.contents[1].role, "user");
        assert_eq!(request.contents[2].role, "user");
        assert_eq!(
            request.system_instruction.parts[0].text.as_deref(),
            Some("be brief")
        );
    }
}
