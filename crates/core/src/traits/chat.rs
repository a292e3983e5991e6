//! Language-model seam.

use async_trait::async_trait;

use crate::chat::{ChatFailure, ChatMessage, ChatParams, ChatReply, ChatSession};
use crate::error::Result;

/// Request/response chat client over an opaque session handle.
///
/// The handle may or may not correspond to a persistent connection;
/// implementations are free to re-send the history on each call.
#[async_trait]
pub trait ChatModel: Send + Sync + 'static {
    /// Opens a chat session seeded with the system prompt and history.
    async fn start_chat(&self, system_prompt: &str, history: &[ChatMessage])
        -> Result<ChatSession>;

    /// Sends one user message. Failures are classified so the controller can
    /// pick the matching recovery utterance; implementations retry transient
    /// failures once (with jitter) before surfacing them.
    async fn send(
        &self,
        session: &mut ChatSession,
        message: &str,
        params: ChatParams,
    ) -> std::result::Result<ChatReply, ChatFailure>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
