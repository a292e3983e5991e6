//! Live recognizer client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use voxline_config::AsrSettings;
use voxline_core::{
    HealthProbe, RecognitionErrorKind, RecognitionEvent, RecognitionParams, Result, ServiceHealth,
    SpeechRecognizer,
};

use crate::protocol::{stream_url, ServerEvent, CLOSE_STREAM_MESSAGE, KEEPALIVE_MESSAGE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Streaming recognizer over a Deepgram-style live transcription API.
///
/// May be shared by many sessions; each `open_stream` call holds its own
/// websocket.
pub struct DeepgramRecognizer {
    settings: AsrSettings,
    http: reqwest::Client,
}

impl DeepgramRecognizer {
    pub fn new(settings: AsrSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    fn probe_url(&self) -> String {
        self.settings
            .endpoint
            .replacen("wss://", "https://", 1)
            .replacen("ws://", "http://", 1)
    }
}

#[async_trait]
impl SpeechRecognizer for DeepgramRecognizer {
    async fn open_stream(
        &self,
        params: RecognitionParams,
        audio: mpsc::Receiver<Bytes>,
    ) -> Result<mpsc::Receiver<RecognitionEvent>> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let settings = self.settings.clone();
        tokio::spawn(run_stream(settings, params, audio, event_tx));
        Ok(event_rx)
    }

    fn name(&self) -> &str {
        "deepgram"
    }
}

#[async_trait]
impl HealthProbe for DeepgramRecognizer {
    async fn check(&self) -> ServiceHealth {
        match timeout(Duration::from_secs(3), self.http.get(self.probe_url()).send()).await {
            Ok(Ok(response)) if response.status().is_server_error() => ServiceHealth::Degraded,
            Ok(Ok(_)) => ServiceHealth::Healthy,
            _ => ServiceHealth::Down,
        }
    }
}

/// Why one websocket session ended.
enum SessionOutcome {
    /// The audio input closed and trailing finals were drained.
    InputDrained,
    /// The stream failed before the input closed.
    StreamFailed(String),
    /// The event receiver was dropped; the session is going away.
    ConsumerGone,
}

/// Drives the stream across at most two websocket sessions (one reconnect).
async fn run_stream(
    settings: AsrSettings,
    params: RecognitionParams,
    mut audio: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<RecognitionEvent>,
) {
    let mut reconnected = false;

    loop {
        let (outcome, returned) = run_session(&settings, &params, audio, &events).await;
        audio = returned;

        match outcome {
            SessionOutcome::InputDrained => break,
            SessionOutcome::ConsumerGone => return,
            SessionOutcome::StreamFailed(message) => {
                if reconnected {
                    tracing::error!(error = %message, "recognizer stream failed after reconnect");
                    break;
                }
                reconnected = true;
                tracing::warn!(error = %message, "recognizer stream failed, reconnecting");
                if events
                    .send(RecognitionEvent::Error {
                        kind: RecognitionErrorKind::Transport,
                        message,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }

    let _ = events.send(RecognitionEvent::Closed).await;
}

enum WriterEnd {
    InputClosed,
    SendFailed(String),
    Cancelled,
}

/// One websocket session: connect, pump audio out and events in.
async fn run_session(
    settings: &AsrSettings,
    params: &RecognitionParams,
    audio: mpsc::Receiver<Bytes>,
    events: &mpsc::Sender<RecognitionEvent>,
) -> (SessionOutcome, mpsc::Receiver<Bytes>) {
    let url = stream_url(&settings.endpoint, params);
    let mut request = match url.into_client_request() {
        Ok(request) => request,
        Err(e) => return (SessionOutcome::StreamFailed(e.to_string()), audio),
    };
    if !settings.api_key.is_empty() {
        match HeaderValue::from_str(&format!("Token {}", settings.api_key)) {
            Ok(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => return (SessionOutcome::StreamFailed(e.to_string()), audio),
        }
    }

    let connect_budget = Duration::from_millis(settings.reconnect_timeout_ms);
    let ws = match timeout(connect_budget, connect_async(request)).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => return (SessionOutcome::StreamFailed(e.to_string()), audio),
        Err(_) => {
            return (
                SessionOutcome::StreamFailed("recognizer connect timed out".to_string()),
                audio,
            )
        }
    };
    tracing::debug!(model = %params.model, "recognizer stream connected");

    let (write, read) = ws.split();
    let cancel = CancellationToken::new();
    let keepalive = Duration::from_secs(settings.keepalive_secs);
    let mut writer: Option<JoinHandle<(mpsc::Receiver<Bytes>, WsWrite, WriterEnd)>> = Some(
        tokio::spawn(writer_loop(write, audio, keepalive, cancel.child_token())),
    );
    let mut parked = None;

    let outcome = read_loop(read, events, &mut writer, &mut parked, settings).await;

    // Recover the audio receiver from the writer regardless of outcome.
    cancel.cancel();
    let audio = match (parked, writer) {
        (Some((audio, _write)), _) => audio,
        (None, Some(handle)) => match handle.await {
            Ok((audio, _write, _end)) => audio,
            Err(e) => {
                tracing::error!(error = %e, "recognizer writer task panicked");
                let (_tx, rx) = mpsc::channel(1);
                rx
            }
        },
        (None, None) => {
            // read_loop either parks the halves or leaves the handle alone.
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    };

    (outcome, audio)
}

/// Forwards audio chunks as binary frames, with periodic keepalives. On
/// input close it sends the end-of-stream marker and leaves the socket open
/// for the drain phase.
async fn writer_loop(
    mut write: WsWrite,
    mut audio: mpsc::Receiver<Bytes>,
    keepalive: Duration,
    cancel: CancellationToken,
) -> (mpsc::Receiver<Bytes>, WsWrite, WriterEnd) {
    let mut ticker = interval(keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return (audio, write, WriterEnd::Cancelled),
            chunk = audio.recv() => match chunk {
                Some(bytes) => {
                    if let Err(e) = write.send(Message::Binary(bytes.to_vec())).await {
                        return (audio, write, WriterEnd::SendFailed(e.to_string()));
                    }
                }
                None => {
                    if let Err(e) = write.send(Message::Text(CLOSE_STREAM_MESSAGE.to_string())).await {
                        return (audio, write, WriterEnd::SendFailed(e.to_string()));
                    }
                    return (audio, write, WriterEnd::InputClosed);
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = write.send(Message::Text(KEEPALIVE_MESSAGE.to_string())).await {
                    return (audio, write, WriterEnd::SendFailed(e.to_string()));
                }
            }
        }
    }
}

/// Converts recognizer messages into events until the stream ends.
///
/// Two phases: before the writer reports input-closed, any closure is a
/// stream failure; afterwards the loop drains trailing finals under a
/// bounded deadline.
async fn read_loop(
    mut read: WsRead,
    events: &mpsc::Sender<RecognitionEvent>,
    writer: &mut Option<JoinHandle<(mpsc::Receiver<Bytes>, WsWrite, WriterEnd)>>,
    parked: &mut Option<(mpsc::Receiver<Bytes>, WsWrite)>,
    settings: &AsrSettings,
) -> SessionOutcome {
    let mut input_closed = false;
    let mut drain_deadline: Option<Instant> = None;
    let mut writer_failed: Option<String> = None;

    loop {
        let drain_sleep = async {
            match drain_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let writer_done = async {
            match writer.as_mut() {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = drain_sleep => return SessionOutcome::InputDrained,

            joined = writer_done => {
                *writer = None;
                let (audio, write, end) = match joined {
                    Ok(parts) => parts,
                    Err(e) => return SessionOutcome::StreamFailed(format!("writer panicked: {e}")),
                };
                *parked = Some((audio, write));
                match end {
                    WriterEnd::InputClosed => {
                        input_closed = true;
                        drain_deadline = Some(Instant::now() + Duration::from_millis(settings.drain_ms));
                    }
                    WriterEnd::SendFailed(message) => writer_failed = Some(message),
                    WriterEnd::Cancelled => {}
                }
            }

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let event = match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(server_event) => server_event.into_recognition_event(),
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable recognizer message");
                            None
                        }
                    };
                    match event {
                        // Service-side errors end the session; run_stream is
                        // the single place that emits Error/Closed events.
                        Some(RecognitionEvent::Error { message, .. }) => {
                            if !input_closed {
                                return SessionOutcome::StreamFailed(message);
                            }
                        }
                        Some(event) => {
                            if events.send(event).await.is_err() {
                                return SessionOutcome::ConsumerGone;
                            }
                        }
                        None => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return if input_closed {
                        SessionOutcome::InputDrained
                    } else if let Some(message) = writer_failed.take() {
                        SessionOutcome::StreamFailed(message)
                    } else {
                        SessionOutcome::StreamFailed("recognizer closed the stream".to_string())
                    };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    return if input_closed {
                        SessionOutcome::InputDrained
                    } else {
                        SessionOutcome::StreamFailed(e.to_string())
                    };
                }
            }
        }
    }
}
