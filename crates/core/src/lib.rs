//! Core traits and types for the voxline call orchestrator
//!
//! This crate provides the foundational types used across all other crates:
//! - Typed records for calls, turns, and transcript segments
//! - Recognition events emitted by the streaming recognizer
//! - Agent configuration snapshots
//! - Service traits for the external collaborators (ASR, LLM, TTS,
//!   session store, call log)
//! - The `SystemServices` bundle threaded into every session

pub mod agent;
pub mod audio;
pub mod call;
pub mod chat;
pub mod conversation;
pub mod error;
pub mod events;
pub mod services;
pub mod traits;

pub use agent::{AgentConfig, VoiceSettings};
pub use audio::{silence_chunk, SILENCE_PLACEHOLDER_MS};
pub use call::{CallDirection, CallRecord, CallStatus, Speaker, TranscriptSegment};
pub use chat::{ChatFailure, ChatMessage, ChatParams, ChatReply, ChatRole, ChatSession, TokenUsage, ToolInvocation};
pub use conversation::{ConversationMemory, TurnRecord};
pub use error::{CallError, Result};
pub use events::{RecognitionErrorKind, RecognitionEvent};
pub use services::SystemServices;

pub use traits::{
    AudioChunkRx, CallLog, ChatModel, HealthProbe, RecognitionParams, ServiceHealth, SessionField,
    SessionStore, SpeechRecognizer, SpeechSynthesizer, SynthesisRequest,
};
