//! Speech recognition and synthesis seams.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentConfig, VoiceSettings};
use crate::error::Result;
use crate::events::RecognitionEvent;

/// Parameters for one live recognition stream, snapshotted from the agent
/// configuration at session start.
#[derive(Debug, Clone)]
pub struct RecognitionParams {
    pub language: String,
    pub model: String,
    pub punctuate: bool,
    pub diarize: bool,
    pub vad_turnoff_ms: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RecognitionParams {
    pub fn from_agent(config: &AgentConfig, sample_rate: u32, channels: u16) -> Self {
        Self {
            language: config.language.clone(),
            model: config.asr_model.clone(),
            punctuate: config.punctuate,
            diarize: config.diarize,
            vad_turnoff_ms: config.vad_turnoff_ms,
            sample_rate,
            channels,
        }
    }
}

/// Streaming speech-to-text client.
///
/// One logical stream per call. The implementation multiplexes audio writes
/// and event reads concurrently, reconnects once on stream error, and always
/// terminates the event channel with `RecognitionEvent::Closed`.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Opens a live stream. Raw PCM flows in on `audio`; events are
    /// delivered on the returned channel in recognizer order. Closing the
    /// audio channel asks the recognizer to flush trailing finals.
    async fn open_stream(
        &self,
        params: RecognitionParams,
        audio: mpsc::Receiver<Bytes>,
    ) -> Result<mpsc::Receiver<RecognitionEvent>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Audio chunks produced by a synthesizer, in utterance order.
pub type AudioChunkRx = mpsc::Receiver<Bytes>;

/// One synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub voice_settings: VoiceSettings,
    pub sample_rate: u32,
}

/// Streaming text-to-speech client.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Starts synthesis and returns the chunk channel. Every read of the
    /// returned channel observes `cancel`: once cancelled, the channel
    /// closes in bounded time even if the upstream service is slow.
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioChunkRx>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
