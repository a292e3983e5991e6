//! Session store seam.
//!
//! A short-TTL key/value mapping keyed `call:<id>:<field>`. The store exists
//! for cross-process handoff and observability; the authoritative speaking
//! flag and conversation history live in-process with the controller, so
//! store failures never fail a call.

use std::time::Duration;

use async_trait::async_trait;

use crate::call::TranscriptSegment;
use crate::error::Result;

/// Per-call fields held in the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionField {
    AgentConfig,
    ConversationMemory,
    IsAiSpeaking,
    TranscriptHistory,
    CurrentStatus,
}

impl SessionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionField::AgentConfig => "agent_config",
            SessionField::ConversationMemory => "conversation_memory",
            SessionField::IsAiSpeaking => "is_ai_speaking",
            SessionField::TranscriptHistory => "transcript_history",
            SessionField::CurrentStatus => "current_status",
        }
    }

    /// Default time-to-live. The agent snapshot outlives the per-call
    /// working state by a wide margin so late webhooks can still resolve it.
    pub fn default_ttl(&self) -> Duration {
        match self {
            SessionField::AgentConfig => Duration::from_secs(24 * 3600),
            _ => Duration::from_secs(3600),
        }
    }

    pub const ALL: [SessionField; 5] = [
        SessionField::AgentConfig,
        SessionField::ConversationMemory,
        SessionField::IsAiSpeaking,
        SessionField::TranscriptHistory,
        SessionField::CurrentStatus,
    ];
}

/// Shared short-TTL session store. Safe for concurrent access across all
/// sessions; no cross-field transactions are required.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Writes one field with a TTL.
    async fn set(
        &self,
        call_id: &str,
        field: SessionField,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<()>;

    /// Reads one field. Absent or expired keys return `None`.
    async fn get(&self, call_id: &str, field: SessionField) -> Result<Option<serde_json::Value>>;

    /// Appends a segment to the call's transcript list.
    async fn append_segment(&self, call_id: &str, segment: &TranscriptSegment) -> Result<()>;

    /// Removes every field for the call.
    async fn clear(&self, call_id: &str) -> Result<()>;
}
