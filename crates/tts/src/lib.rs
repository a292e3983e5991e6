//! Streaming speech synthesis client
//!
//! Wraps an ElevenLabs-style streaming endpoint behind the
//! `SpeechSynthesizer` seam. Synthesized audio arrives on a bounded chunk
//! channel with a cancellation token interposed on every read, so a
//! cancelled playback completes in bounded time even when the upstream
//! service is slow to close.

mod elevenlabs;

pub use elevenlabs::ElevenLabsSynthesizer;
