//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub media: MediaSettings,

    #[serde(default)]
    pub asr: AsrSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub tts: TtsSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub records: RecordsSettings,

    #[serde(default)]
    pub telephony: TelephonySettings,

    #[serde(default)]
    pub session: SessionLimits,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL handed to the telephony provider for webhooks.
    #[serde(default)]
    pub public_url: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
            cors_origins: Vec::new(),
            log_json: false,
            log_level: default_log_level(),
        }
    }
}

/// Media codec and channel sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSettings {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// InboundAudio channel depth, in frames (a frame is ~20 ms).
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer_frames: usize,
    /// Egress channel depth, in frames.
    #[serde(default = "default_egress_buffer")]
    pub egress_buffer_frames: usize,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

fn default_encoding() -> String {
    "linear16".to_string()
}

fn default_inbound_buffer() -> usize {
    8
}

fn default_egress_buffer() -> usize {
    16
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            encoding: default_encoding(),
            inbound_buffer_frames: default_inbound_buffer(),
            egress_buffer_frames: default_egress_buffer(),
        }
    }
}

/// Streaming recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrSettings {
    #[serde(default = "default_asr_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// How long to wait for trailing finals after end-of-stream.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
    /// Budget for the single reconnect attempt.
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
}

fn default_asr_endpoint() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_keepalive_secs() -> u64 {
    4
}

fn default_drain_ms() -> u64 {
    2_000
}

fn default_reconnect_timeout_ms() -> u64 {
    5_000
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            endpoint: default_asr_endpoint(),
            api_key: String::new(),
            keepalive_secs: default_keepalive_secs(),
            drain_ms: default_drain_ms(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
        }
    }
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_llm_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_llm_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    15_000
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            request_timeout_ms: default_llm_timeout_ms(),
        }
    }
}

/// Streaming synthesizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    /// Time-to-first-byte budget before the controller falls back to a
    /// silent placeholder.
    #[serde(default = "default_ttfb_ms")]
    pub ttfb_ms: u64,
}

fn default_tts_endpoint() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2".to_string()
}

fn default_ttfb_ms() -> u64 {
    800
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: default_tts_endpoint(),
            api_key: String::new(),
            model_id: default_tts_model(),
            ttfb_ms: default_ttfb_ms(),
        }
    }
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// When false, sessions use the in-memory store only.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            enabled: true,
        }
    }
}

/// Durable records (management storage + call log) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsSettings {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// Retry queue capacity; oldest entries are dropped on overflow.
    #[serde(default = "default_retry_queue_max")]
    pub retry_queue_max: usize,
}

fn default_retry_queue_max() -> usize {
    256
}

impl Default for RecordsSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            retry_queue_max: default_retry_queue_max(),
        }
    }
}

/// Telephony provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelephonySettings {
    #[serde(default)]
    pub space_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub token: String,
}

/// Per-session timing knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Call ends after this long with no recognition or playback activity.
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,
    /// Soft maximum utterance window: after this long without a final, the
    /// latest interim is promoted to one.
    #[serde(default = "default_utterance_cap_secs")]
    pub utterance_cap_secs: u64,
    /// Grace window for child tasks to honor cancellation at teardown.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Budget for a playback task to acknowledge cancellation (barge-in).
    #[serde(default = "default_playback_cancel_ms")]
    pub playback_cancel_ms: u64,
}

fn default_inactivity_secs() -> u64 {
    600
}

fn default_utterance_cap_secs() -> u64 {
    30
}

fn default_grace_ms() -> u64 {
    2_000
}

fn default_playback_cancel_ms() -> u64 {
    100
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            inactivity_secs: default_inactivity_secs(),
            utterance_cap_secs: default_utterance_cap_secs(),
            grace_ms: default_grace_ms(),
            playback_cancel_ms: default_playback_cancel_ms(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.media.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "media.sample_rate".to_string(),
                message: "must be non-zero".to_string(),
            });
        }

        if self.media.channels == 0 {
            return Err(ConfigError::InvalidValue {
                field: "media.channels".to_string(),
                message: "must be non-zero".to_string(),
            });
        }

        if self.media.inbound_buffer_frames == 0 || self.media.egress_buffer_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "media.buffer_frames".to_string(),
                message: "channel depths must be non-zero".to_string(),
            });
        }

        if self.session.playback_cancel_ms > self.session.grace_ms {
            return Err(ConfigError::InvalidValue {
                field: "session.playback_cancel_ms".to_string(),
                message: "must not exceed the teardown grace window".to_string(),
            });
        }

        if self.session.utterance_cap_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.utterance_cap_secs".to_string(),
                message: "must be non-zero".to_string(),
            });
        }

        if self.environment.is_production() {
            if self.asr.api_key.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "asr.api_key".to_string(),
                    message: "required in production".to_string(),
                });
            }
            if self.server.public_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "server.public_url".to_string(),
                    message: "required in production (webhook callback base)".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > `config/{env}.yaml` > `config/default.yaml` >
/// built-in defaults. Missing files are fine; env vars use the `VOXLINE_`
/// prefix with `__` separators (e.g. `VOXLINE_ASR__API_KEY`).
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = Path::new("config/default.yaml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }

    if let Some(env_name) = env {
        let env_path_string = format!("config/{env_name}.yaml");
        let env_path = Path::new(&env_path_string);
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        } else {
            tracing::warn!(path = %env_path.display(), "environment config file not found");
        }
    }

    builder = builder.add_source(Environment::with_prefix("VOXLINE").separator("__"));

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.media.sample_rate, 16_000);
        assert_eq!(settings.session.utterance_cap_secs, 30);
        assert_eq!(settings.tts.ttfb_ms, 800);
        assert_eq!(settings.llm.request_timeout_ms, 15_000);
    }

    #[test]
    fn rejects_cancel_budget_above_grace() {
        let mut settings = Settings::default();
        settings.session.playback_cancel_ms = 5_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn production_requires_keys() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());

        settings.asr.api_key = "key".to_string();
        settings.server.public_url = "https://voice.example.com".to_string();
        assert!(settings.validate().is_ok());
    }
}
