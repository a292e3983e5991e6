//! ElevenLabs streaming backend.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use voxline_config::TtsSettings;
use voxline_core::{
    silence_chunk, AudioChunkRx, HealthProbe, Result, ServiceHealth, SpeechSynthesizer,
    SynthesisRequest, VoiceSettings, SILENCE_PLACEHOLDER_MS,
};

/// Streaming synthesizer over the ElevenLabs text-to-speech API.
pub struct ElevenLabsSynthesizer {
    settings: TtsSettings,
    client: Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(settings: TtsSettings) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }

    fn stream_url(&self, voice_id: &str, sample_rate: u32) -> String {
        format!(
            "{}/v1/text-to-speech/{voice_id}/stream?output_format=pcm_{sample_rate}",
            self.settings.endpoint
        )
    }
}

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioChunkRx> {
        let (tx, rx) = mpsc::channel(32);
        let url = self.stream_url(&request.voice_id, request.sample_rate);
        let client = self.client.clone();
        let api_key = self.settings.api_key.clone();
        let model_id = self.settings.model_id.clone();
        let sample_rate = request.sample_rate;

        tokio::spawn(async move {
            let body = SynthesisBody {
                text: &request.text,
                model_id: &model_id,
                voice_settings: &request.voice_settings,
            };

            let send = client
                .post(&url)
                .header("xi-api-key", &api_key)
                .json(&body)
                .send();

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                response = send => response,
            };

            let response = match response.and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, "synthesis request failed, yielding silence");
                    let _ = tx.send(silence_chunk(SILENCE_PLACEHOLDER_MS, sample_rate)).await;
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut chunks: u64 = 0;
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(chunks, "synthesis stream cancelled");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        chunks += 1;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            sent = tx.send(bytes) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, chunks, "synthesis stream error, yielding silence");
                        let _ = tx.send(silence_chunk(SILENCE_PLACEHOLDER_MS, sample_rate)).await;
                        return;
                    }
                    None => {
                        tracing::debug!(chunks, "synthesis stream complete");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

#[async_trait]
impl HealthProbe for ElevenLabsSynthesizer {
    async fn check(&self) -> ServiceHealth {
        let url = format!("{}/v1/voices", self.settings.endpoint);
        let probe = self
            .client
            .get(url)
            .header("xi-api-key", &self.settings.api_key)
            .send();
        match timeout(Duration::from_secs(3), probe).await {
            Ok(Ok(response)) if response.status().is_success() => ServiceHealth::Healthy,
            Ok(Ok(_)) => ServiceHealth::Degraded,
            _ => ServiceHealth::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_carries_pcm_format() {
        let synthesizer = ElevenLabsSynthesizer::new(TtsSettings::default());
        let url = synthesizer.stream_url("rachel", 16_000);
        assert!(url.contains("/v1/text-to-speech/rachel/stream"));
        assert!(url.contains("output_format=pcm_16000"));
    }
}
