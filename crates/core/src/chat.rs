//! Chat types shared between the controller and the language-model client.

use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of conversation history, as sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// Token accounting reported by the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A tool call proposed by the model. Execution is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A successful model reply.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Option<TokenUsage>,
}

/// Generation parameters, read from the agent configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChatParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Opaque chat-session handle.
///
/// Implementations are free to re-send the history on every call; this
/// handle carries everything needed for that.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
}

/// Classified language-model failure.
///
/// Each class maps to a distinct recovery in the turn controller: a canned
/// refusal, a rephrase prompt, or a generic fallback utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatFailure {
    /// The model declined the prompt on content-policy grounds.
    PolicyRefusal,
    /// The model returned no usable text.
    Empty,
    /// A network-level failure that survived one retry.
    Transient(String),
    /// Everything else.
    Fatal(String),
}

impl std::fmt::Display for ChatFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatFailure::PolicyRefusal => write!(f, "content policy refusal"),
            ChatFailure::Empty => write!(f, "empty completion"),
            ChatFailure::Transient(m) => write!(f, "transient error: {m}"),
            ChatFailure::Fatal(m) => write!(f, "fatal error: {m}"),
        }
    }
}
