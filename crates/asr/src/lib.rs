//! Streaming speech recognition client
//!
//! One websocket per call to a Deepgram-style live transcription API.
//! Audio writes and event reads are multiplexed concurrently; the client
//! reconnects once (with fresh context) on stream error and always
//! terminates its event channel with `RecognitionEvent::Closed`.

mod client;
mod protocol;

pub use client::DeepgramRecognizer;
