//! Wire types for the live transcription protocol.

use serde::Deserialize;

use voxline_core::{RecognitionErrorKind, RecognitionEvent, RecognitionParams};

/// Server → client message. The `type` tag discriminates.
#[derive(Debug, Deserialize)]
pub(crate) struct ServerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Channel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

impl ServerEvent {
    /// Maps a server message onto a recognition event, if it carries one.
    pub fn into_recognition_event(self) -> Option<RecognitionEvent> {
        match self.event_type.as_str() {
            "Results" => {
                let alternative = self.channel?.alternatives.into_iter().next()?;
                if self.is_final {
                    Some(RecognitionEvent::Final {
                        text: alternative.transcript,
                        duration: self.duration,
                        confidence: alternative.confidence,
                    })
                } else {
                    Some(RecognitionEvent::Interim {
                        text: alternative.transcript,
                    })
                }
            }
            "SpeechStarted" => Some(RecognitionEvent::SpeechStarted),
            "Metadata" | "UtteranceEnd" => None,
            "error" | "Error" => Some(RecognitionEvent::Error {
                kind: RecognitionErrorKind::Service,
                message: self
                    .description
                    .unwrap_or_else(|| "unspecified recognizer error".to_string()),
            }),
            other => {
                tracing::trace!(event = %other, "ignoring recognizer event");
                None
            }
        }
    }
}

/// Builds the stream URL from the endpoint and per-call parameters.
pub(crate) fn stream_url(endpoint: &str, params: &RecognitionParams) -> String {
    format!(
        "{endpoint}?model={model}&language={language}&encoding=linear16\
         &sample_rate={rate}&channels={channels}&punctuate={punctuate}\
         &diarize={diarize}&interim_results=true&vad_events=true\
         &endpointing={endpointing}",
        model = params.model,
        language = params.language,
        rate = params.sample_rate,
        channels = params.channels,
        punctuate = params.punctuate,
        diarize = params.diarize,
        endpointing = params.vad_turnoff_ms,
    )
}

pub(crate) const KEEPALIVE_MESSAGE: &str = r#"{"type":"KeepAlive"}"#;
pub(crate) const CLOSE_STREAM_MESSAGE: &str = r#"{"type":"CloseStream"}"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RecognitionParams {
        RecognitionParams {
            language: "en".to_string(),
            model: "nova-2".to_string(),
            punctuate: true,
            diarize: false,
            vad_turnoff_ms: 700,
            sample_rate: 16_000,
            channels: 1,
        }
    }

    #[test]
    fn url_carries_agent_parameters() {
        let url = stream_url("wss://api.deepgram.com/v1/listen", &params());
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("language=en"));
        assert!(url.contains("endpointing=700"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("vad_events=true"));
    }

    #[test]
    fn final_result_maps_to_final_event() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "duration": 2.1,
            "channel": {"alternatives": [{"transcript": "hello there", "confidence": 0.97}]}
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event.into_recognition_event(),
            Some(RecognitionEvent::Final {
                text: "hello there".to_string(),
                duration: 2.1,
                confidence: 0.97,
            })
        );
    }

    #[test]
    fn interim_and_speech_started_map() {
        let raw = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "hel"}]}
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event.into_recognition_event(),
            Some(RecognitionEvent::Interim {
                text: "hel".to_string()
            })
        );

        let raw = r#"{"type": "SpeechStarted"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event.into_recognition_event(),
            Some(RecognitionEvent::SpeechStarted)
        );
    }

    #[test]
    fn metadata_is_silent() {
        let raw = r#"{"type": "Metadata"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(event.into_recognition_event().is_none());
    }
}
