//! Service traits for the external collaborators.
//!
//! Recognition, language modelling, and synthesis are opaque streaming
//! services; the session store and call log are shared infrastructure.
//! Everything the session touches goes through these seams so that a fake
//! `SystemServices` can simulate every dependency in tests.

mod chat;
mod health;
mod log;
mod speech;
mod store;

pub use chat::ChatModel;
pub use health::{HealthProbe, ServiceHealth};
pub use log::CallLog;
pub use speech::{AudioChunkRx, RecognitionParams, SpeechRecognizer, SpeechSynthesizer, SynthesisRequest};
pub use store::{SessionField, SessionStore};
