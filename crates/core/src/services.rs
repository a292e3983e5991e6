//! The explicit service bundle threaded into every session.
//!
//! There are no module-level client singletons anywhere in this system;
//! whoever constructs a session supplies its collaborators here. Tests hand
//! in fakes for all five.

use std::sync::Arc;

use crate::traits::{CallLog, ChatModel, SessionStore, SpeechRecognizer, SpeechSynthesizer};

/// Handles to the external collaborators of a call session.
///
/// Clients may be pooled and shared by many sessions; each session holds its
/// own logical stream on top of them.
#[derive(Clone)]
pub struct SystemServices {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub chat: Arc<dyn ChatModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub store: Arc<dyn SessionStore>,
    pub call_log: Arc<dyn CallLog>,
}
