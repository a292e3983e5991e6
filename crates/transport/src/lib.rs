//! Media-session framing and ingress/egress transport
//!
//! The wire format is a JSON envelope stream over a bidirectional websocket:
//! `connect` negotiates the codec, `media` carries one base64 audio chunk,
//! `mark` is an opaque pacing marker, `stop` signals peer-side closure and
//! `error` reports peer-side failure. Frames are authoritative; no raw
//! binary travels outside the envelope.
//!
//! Ingress decodes inbound `media` frames onto a bounded PCM channel
//! (backpressure blocks the producer and ultimately the peer's TCP stream).
//! Egress performs the inverse, interleaving `mark` frames for pacing, and
//! drops frames belonging to a superseded utterance so that a cancelled
//! reply can never interleave with its successor.

mod egress;
mod frame;
mod ingress;
mod ws;

pub use egress::{run_egress, EgressEnd, EgressFrame, EgressHandle};
pub use frame::{Codec, MediaMessage, MediaPayload};
pub use ingress::{run_ingress, IngressEnd};
pub use ws::{connect_media, MediaSink, MediaSource, WsMediaSink, WsMediaSource};

/// Transport-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("invalid media frame: {0}")]
    InvalidFrame(String),

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("transport closed")]
    Closed,
}
