//! Websocket media transport.
//!
//! The session dials out to the provider's `media_url` and immediately sends
//! the `connect` envelope. The socket is split so that Ingress and Egress
//! each hold one half and detect closure independently.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::frame::{Codec, MediaMessage};
use crate::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of a media connection.
#[async_trait]
pub trait MediaSource: Send + 'static {
    /// Next envelope message, or `None` once the transport is closed.
    async fn next_message(&mut self) -> Result<Option<MediaMessage>, TransportError>;
}

/// Write half of a media connection.
#[async_trait]
pub trait MediaSink: Send + 'static {
    async fn send(&mut self, message: MediaMessage) -> Result<(), TransportError>;
}

pub struct WsMediaSource {
    read: SplitStream<WsStream>,
}

pub struct WsMediaSink {
    write: SplitSink<WsStream, Message>,
}

/// Connects to the provider's media websocket and negotiates the codec.
pub async fn connect_media(
    media_url: &str,
    codec: Codec,
) -> Result<(WsMediaSink, WsMediaSource), TransportError> {
    let (ws, _response) = connect_async(media_url)
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

    let (mut write, read) = ws.split();

    let connect = MediaMessage::connect(codec);
    write
        .send(Message::Text(connect.to_json()))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

    tracing::debug!(url = %media_url, "media websocket connected");

    Ok((WsMediaSink { write }, WsMediaSource { read }))
}

#[async_trait]
impl MediaSource for WsMediaSource {
    async fn next_message(&mut self) -> Result<Option<MediaMessage>, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match MediaMessage::parse(&text) {
                        Ok(message) => return Ok(Some(message)),
                        Err(e) => {
                            // Frames are authoritative; an unparseable one is
                            // logged and skipped rather than killing the call.
                            tracing::warn!(error = %e, "discarding malformed media frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!(bytes = data.len(), "ignoring raw binary outside the envelope");
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl MediaSink for WsMediaSink {
    async fn send(&mut self, message: MediaMessage) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(message.to_json()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
