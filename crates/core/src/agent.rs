//! Agent configuration snapshot.
//!
//! An `AgentConfig` is loaded once at session start and is immutable for the
//! lifetime of the call. Later changes to the underlying management record
//! have no effect on live calls.

use serde::{Deserialize, Serialize};

/// Voice style parameters forwarded to the synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default)]
    pub style: f32,
    #[serde(default)]
    pub use_speaker_boost: bool,
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: 0.0,
            use_speaker_boost: false,
        }
    }
}

/// Immutable per-call agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub voice_id: String,
    #[serde(default)]
    pub voice_settings: VoiceSettings,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_asr_model")]
    pub asr_model: String,
    #[serde(default = "default_true")]
    pub punctuate: bool,
    #[serde(default)]
    pub diarize: bool,
    /// Recognizer endpointing interval: silence (ms) after which an
    /// utterance is finalized.
    #[serde(default = "default_vad_turnoff_ms")]
    pub vad_turnoff_ms: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_greeting")]
    pub initial_greeting: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Names of tools the agent may propose. Execution is out of scope; a
    /// proposed call is surfaced as text.
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}

fn default_asr_model() -> String {
    "nova-2".to_string()
}

fn default_vad_turnoff_ms() -> u32 {
    700
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant on a phone call. Respond concisely and \
     naturally; your replies will be spoken aloud."
        .to_string()
}

fn default_greeting() -> String {
    "Hello, how can I help you today?".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    256
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            is_active: true,
            voice_id: String::new(),
            voice_settings: VoiceSettings::default(),
            language: default_language(),
            asr_model: default_asr_model(),
            punctuate: true,
            diarize: false,
            vad_turnoff_ms: default_vad_turnoff_ms(),
            system_prompt: default_system_prompt(),
            initial_greeting: default_greeting(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tools: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_sparse_record() {
        // Management storage only guarantees id and voice_id; everything else
        // falls back to defaults.
        let config: AgentConfig =
            serde_json::from_str(r#"{"id": "agent-1", "voice_id": "rachel"}"#).unwrap();
        assert_eq!(config.id, "agent-1");
        assert!(config.is_active);
        assert_eq!(config.vad_turnoff_ms, 700);
        assert_eq!(config.language, "en");
        assert!(!config.initial_greeting.is_empty());
    }
}
