//! Conversation history types.
//!
//! History is append-only for the lifetime of a call. The single permitted
//! mutation is marking an assistant turn truncated when playback is cut
//! short by barge-in; the text itself never changes after append.

use serde::{Deserialize, Serialize};

use crate::call::Speaker;
use crate::chat::ChatMessage;

/// One element of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub speaker: Speaker,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// True when playback of this assistant turn was interrupted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl TurnRecord {
    pub fn user(text: impl Into<String>, asr_seconds: f64, confidence: f64) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            timestamp_ms: now_ms(),
            asr_seconds: Some(asr_seconds),
            prompt_tokens: None,
            completion_tokens: None,
            confidence: Some(confidence),
            truncated: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            timestamp_ms: now_ms(),
            asr_seconds: None,
            prompt_tokens: None,
            completion_tokens: None,
            confidence: None,
            truncated: false,
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.prompt_tokens = Some(prompt_tokens);
        self.completion_tokens = Some(completion_tokens);
        self
    }
}

/// Append-only conversation memory, owned by the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    turns: Vec<TurnRecord>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn and returns its index.
    pub fn push(&mut self, turn: TurnRecord) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Marks the turn at `index` truncated. Out-of-range indices are ignored.
    pub fn mark_truncated(&mut self, index: usize) {
        if let Some(turn) = self.turns.get_mut(index) {
            turn.truncated = true;
        }
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Projects the history into chat messages for the model.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|turn| ChatMessage {
                role: match turn.speaker {
                    Speaker::User => crate::chat::ChatRole::User,
                    Speaker::Assistant => crate::chat::ChatRole::Assistant,
                },
                text: turn.text.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_truncate() {
        let mut memory = ConversationMemory::new();
        let greeting = memory.push(TurnRecord::assistant("Hello"));
        memory.push(TurnRecord::user("hi there", 1.2, 0.98));

        memory.mark_truncated(greeting);
        assert!(memory.turns()[greeting].truncated);
        assert!(!memory.turns()[1].truncated);

        // Out-of-range is a no-op, not a panic.
        memory.mark_truncated(42);
    }

    #[test]
    fn chat_history_preserves_order_and_roles() {
        let mut memory = ConversationMemory::new();
        memory.push(TurnRecord::assistant("Hello"));
        memory.push(TurnRecord::user("what is the weather", 2.0, 0.9));

        let history = memory.chat_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, crate::chat::ChatRole::Assistant);
        assert_eq!(history[1].role, crate::chat::ChatRole::User);
        assert_eq!(history[1].text, "what is the weather");
    }

    #[test]
    fn truncated_flag_omitted_when_false() {
        let turn = TurnRecord::assistant("hi");
        let json = serde_json::to_value(&turn).unwrap();
        assert!(json.get("truncated").is_none());
    }
}
