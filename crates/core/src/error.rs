//! Error types shared across the call pipeline.
//!
//! Every recoverable outcome in the pipeline is modelled as a tagged result
//! (a `RecognitionEvent` arm, a `ChatFailure`, a silent TTS placeholder).
//! `CallError` covers the remainder: conditions that either end the call or
//! are absorbed at a component boundary and logged.

use thiserror::Error;

/// Errors raised by call-pipeline components.
#[derive(Debug, Error)]
pub enum CallError {
    /// The peer closed the media transport.
    #[error("media transport closed by peer")]
    TransportClosed,

    /// The recognizer stream failed beyond its single reconnect.
    #[error("recognizer stream error: {message}")]
    AsrStream { message: String },

    /// The language model refused the prompt on content-policy grounds.
    #[error("language model refused the prompt")]
    LlmPolicyRefusal,

    /// A transient language-model failure (retried once before surfacing).
    #[error("transient language model error: {message}")]
    LlmTransient { message: String },

    /// A non-retryable language-model failure; the call stays alive.
    #[error("language model error: {message}")]
    LlmFatal { message: String },

    /// Synthesis produced no audio within the TTFB budget.
    #[error("synthesis timed out before first chunk")]
    TtsTimeout,

    /// The synthesis stream failed mid-utterance.
    #[error("synthesis stream error: {message}")]
    TtsStream { message: String },

    /// The session store is unreachable; callers degrade to local state.
    #[error("session store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// No agent configuration could be resolved for the call.
    #[error("agent configuration not found: {detail}")]
    ConfigNotFound { detail: String },

    /// A programmer error or unclassified failure.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CallError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error cancels the session outright.
    ///
    /// Non-fatal kinds are absorbed at the component boundary and surface as
    /// controller events (fallback utterances, placeholders, degraded state).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::TransportClosed
                | CallError::AsrStream { .. }
                | CallError::ConfigNotFound { .. }
                | CallError::Internal { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
