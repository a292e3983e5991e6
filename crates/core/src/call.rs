//! Durable call records and transcript segments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a call relative to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Terminal and in-flight call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    /// Media session is being established or is live.
    Answered,
    /// The call ran to a clean end.
    Completed,
    /// The call failed before or during the media session.
    Failed,
    /// The peer hung up while the session was active.
    EndedByPeer,
    /// The call was answered but no media session was ever established.
    Abandoned,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Answered)
    }
}

/// Who produced a transcript segment or conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

/// Durable record for a call as a whole.
///
/// Upserts are idempotent on `id`; only session teardown finalizes the
/// record after its initial write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl CallRecord {
    pub fn new(
        id: impl Into<String>,
        direction: CallDirection,
        from_number: impl Into<String>,
        to_number: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            direction,
            from_number: from_number.into(),
            to_number: to_number.into(),
            agent_id: agent_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: CallStatus::Answered,
            duration_seconds: None,
            cost: None,
        }
    }

    /// Finalize the record with a terminal status and end timestamp.
    pub fn finalize(&mut self, status: CallStatus) {
        let ended = Utc::now();
        self.status = status;
        self.duration_seconds = Some(
            (ended - self.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
        self.ended_at = Some(ended);
    }
}

/// One finalized turn, written to the call log.
///
/// The per-call `sequence_number` is assigned by the log writer, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub call_id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

impl TranscriptSegment {
    pub fn new(call_id: impl Into<String>, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
            asr_seconds: None,
            prompt_tokens: None,
            completion_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&CallStatus::EndedByPeer).unwrap(),
            "\"ended-by-peer\""
        );
        assert_eq!(
            serde_json::from_str::<CallStatus>("\"completed\"").unwrap(),
            CallStatus::Completed
        );
    }

    #[test]
    fn finalize_sets_end_and_duration() {
        let mut record = CallRecord::new("c1", CallDirection::Inbound, "+1", "+2", "a1");
        assert!(!record.status.is_terminal());
        record.finalize(CallStatus::Completed);
        assert!(record.status.is_terminal());
        assert!(record.ended_at.is_some());
        assert!(record.duration_seconds.is_some());
    }
}
