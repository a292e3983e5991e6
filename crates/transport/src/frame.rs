//! Media-session JSON envelope.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Codec negotiated on `connect`. Typically 16 kHz mono linear PCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codec {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Codec {
    pub fn linear16(sample_rate: u32, channels: u16) -> Self {
        Self {
            name: "linear16".to_string(),
            sample_rate,
            channels,
        }
    }
}

/// The base64 payload of one `media` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

/// One message of the media-session envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaMessage {
    /// Opens the session and negotiates the codec.
    Connect {
        protocol: String,
        codec: Codec,
    },
    /// One audio chunk.
    Media {
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    /// Opaque client-assigned progress marker.
    Mark {
        name: String,
    },
    /// Peer-side closure.
    Stop,
    /// Peer-side failure.
    Error {
        #[serde(default)]
        message: String,
    },
}

impl MediaMessage {
    pub fn connect(codec: Codec) -> Self {
        Self::Connect {
            protocol: "websocket".to_string(),
            codec,
        }
    }

    /// Builds a `media` frame from raw PCM bytes.
    pub fn media(stream_sid: Option<String>, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid,
            media: MediaPayload {
                payload: BASE64.encode(audio),
            },
        }
    }

    /// Decodes the payload of a `media` frame. Errors on other variants.
    pub fn decode_payload(&self) -> Result<Bytes, TransportError> {
        match self {
            MediaMessage::Media { media, .. } => Ok(Bytes::from(BASE64.decode(&media.payload)?)),
            other => Err(TransportError::InvalidFrame(format!(
                "not a media frame: {other:?}"
            ))),
        }
    }

    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::InvalidFrame(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // The envelope types contain nothing unserializable.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_payload_round_trips_byte_identical() {
        let audio: Vec<u8> = (0..=255).collect();
        let frame = MediaMessage::media(Some("stream-1".to_string()), &audio);
        let decoded = frame.decode_payload().unwrap();
        assert_eq!(decoded.as_ref(), audio.as_slice());

        // And survives a trip through the JSON envelope.
        let parsed = MediaMessage::parse(&frame.to_json()).unwrap();
        assert_eq!(parsed.decode_payload().unwrap().as_ref(), audio.as_slice());
    }

    #[test]
    fn event_tags_match_the_wire_schema() {
        let connect = MediaMessage::connect(Codec::linear16(16_000, 1));
        let json: serde_json::Value = serde_json::from_str(&connect.to_json()).unwrap();
        assert_eq!(json["event"], "connect");
        assert_eq!(json["codec"]["sample_rate"], 16_000);

        let stop = MediaMessage::parse(r#"{"event": "stop"}"#).unwrap();
        assert_eq!(stop, MediaMessage::Stop);

        let error = MediaMessage::parse(r#"{"event": "error", "message": "bad"}"#).unwrap();
        assert_eq!(
            error,
            MediaMessage::Error {
                message: "bad".to_string()
            }
        );
    }

    #[test]
    fn rejects_garbage_payload() {
        let frame = MediaMessage::Media {
            stream_sid: None,
            media: MediaPayload {
                payload: "not base64!!!".to_string(),
            },
        };
        assert!(frame.decode_payload().is_err());
    }
}
