//! Chat language-model client
//!
//! Implements the Gemini generateContent API behind the `ChatModel` seam.
//! The chat handle is a plain value carrying the system prompt and history;
//! every `send` re-transmits the history, which the seam explicitly allows.
//!
//! Failures are classified for the turn controller: content-policy refusals,
//! empty completions, transient network errors (retried once with jitter),
//! and everything else as fatal.

mod gemini;

pub use gemini::GeminiChat;
