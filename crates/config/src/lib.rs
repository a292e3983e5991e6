//! Layered configuration for the voxline call orchestrator
//!
//! Priority: env vars (`VOXLINE_*`) > `config/{env}.yaml` >
//! `config/default.yaml` > built-in defaults.

mod settings;

pub use settings::{
    load_settings, AsrSettings, LlmSettings, MediaSettings, RecordsSettings, RuntimeEnvironment,
    ServerSettings, SessionLimits, Settings, StoreSettings, TelephonySettings, TtsSettings,
};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
