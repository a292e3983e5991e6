//! End-to-end call flows over fake collaborators.
//!
//! Every external dependency is simulated: a scripted recognizer, a canned
//! chat model, a paced synthesizer, the in-memory store, and an in-memory
//! call log. The media transport is a pair of in-process channels.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voxline_config::Settings;
use voxline_core::{
    AgentConfig, AudioChunkRx, CallDirection, CallError, CallRecord, CallStatus, ChatFailure,
    ChatMessage, ChatModel, ChatParams, ChatReply, ChatSession, RecognitionEvent,
    RecognitionParams, Result, SessionField, SessionStore, Speaker, SpeechRecognizer,
    SpeechSynthesizer, SynthesisRequest, SystemServices, TranscriptSegment,
};
use voxline_records::MemoryCallLog;
use voxline_session::{run_call, CallSetup};
use voxline_store::InMemorySessionStore;
use voxline_transport::{MediaMessage, MediaSink, MediaSource, TransportError};

// Fakes

struct ScriptedRecognizer {
    stream: Mutex<Option<mpsc::Receiver<RecognitionEvent>>>,
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn open_stream(
        &self,
        _params: RecognitionParams,
        mut audio: mpsc::Receiver<Bytes>,
    ) -> Result<mpsc::Receiver<RecognitionEvent>> {
        // Keep the audio side drained like a live recognizer would.
        tokio::spawn(async move { while audio.recv().await.is_some() {} });
        self.stream
            .lock()
            .take()
            .ok_or_else(|| CallError::internal("recognizer stream already taken"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct FakeChat {
    replies: Mutex<VecDeque<std::result::Result<ChatReply, ChatFailure>>>,
    messages: Mutex<Vec<String>>,
    delay: Duration,
}

impl FakeChat {
    fn new(replies: Vec<std::result::Result<ChatReply, ChatFailure>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            messages: Mutex::new(Vec::new()),
            delay: Duration::from_millis(10),
        }
    }

    fn reply(text: &str) -> std::result::Result<ChatReply, ChatFailure> {
        Ok(ChatReply {
            text: text.to_string(),
            tool_calls: Vec::new(),
            usage: None,
        })
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn start_chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<ChatSession> {
        Ok(ChatSession {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
        })
    }

    async fn send(
        &self,
        _session: &mut ChatSession,
        message: &str,
        _params: ChatParams,
    ) -> std::result::Result<ChatReply, ChatFailure> {
        self.messages.lock().push(message.to_string());
        tokio::time::sleep(self.delay).await;
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| FakeChat::reply("Okay."))
    }

    fn name(&self) -> &str {
        "fake-chat"
    }
}

struct PacedSynthesizer {
    requests: Mutex<Vec<String>>,
    chunks: usize,
    chunk_delay: Duration,
}

impl PacedSynthesizer {
    fn new(chunks: usize, chunk_delay: Duration) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            chunks,
            chunk_delay,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for PacedSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioChunkRx> {
        self.requests.lock().push(request.text.clone());
        let (tx, rx) = mpsc::channel(8);
        let chunks = self.chunks;
        let delay = self.chunk_delay;
        tokio::spawn(async move {
            for index in 0..chunks {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(Bytes::from(vec![index as u8; 320])).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn name(&self) -> &str {
        "paced"
    }
}

/// Store that fails every operation, for the outage scenario.
struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn set(
        &self,
        _call_id: &str,
        _field: SessionField,
        _value: serde_json::Value,
        _ttl: Duration,
    ) -> Result<()> {
        Err(CallError::StoreUnavailable {
            message: "store offline".to_string(),
        })
    }

    async fn get(&self, _call_id: &str, _field: SessionField) -> Result<Option<serde_json::Value>> {
        Err(CallError::StoreUnavailable {
            message: "store offline".to_string(),
        })
    }

    async fn append_segment(&self, _call_id: &str, _segment: &TranscriptSegment) -> Result<()> {
        Err(CallError::StoreUnavailable {
            message: "store offline".to_string(),
        })
    }

    async fn clear(&self, _call_id: &str) -> Result<()> {
        Err(CallError::StoreUnavailable {
            message: "store offline".to_string(),
        })
    }
}

struct ChannelSource {
    rx: mpsc::Receiver<MediaMessage>,
}

#[async_trait]
impl MediaSource for ChannelSource {
    async fn next_message(&mut self) -> std::result::Result<Option<MediaMessage>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[derive(Clone)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<MediaMessage>>>,
}

#[async_trait]
impl MediaSink for RecordingSink {
    async fn send(&mut self, message: MediaMessage) -> std::result::Result<(), TransportError> {
        self.frames.lock().push(message);
        Ok(())
    }
}

// Harness

struct Harness {
    chat: Arc<FakeChat>,
    synth: Arc<PacedSynthesizer>,
    log: Arc<MemoryCallLog>,
    store: Arc<dyn SessionStore>,
    events: mpsc::Sender<RecognitionEvent>,
    media: Option<mpsc::Sender<MediaMessage>>,
    frames: Arc<Mutex<Vec<MediaMessage>>>,
    call: JoinHandle<CallRecord>,
}

struct HarnessOptions {
    replies: Vec<std::result::Result<ChatReply, ChatFailure>>,
    synth_chunks: usize,
    synth_chunk_delay: Duration,
    chat_delay: Duration,
    failing_store: bool,
    utterance_cap_secs: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            replies: Vec::new(),
            synth_chunks: 3,
            synth_chunk_delay: Duration::from_millis(5),
            chat_delay: Duration::from_millis(10),
            failing_store: false,
            utterance_cap_secs: 30,
        }
    }
}

fn agent() -> AgentConfig {
    AgentConfig {
        id: "agent-a".to_string(),
        name: "Agent A".to_string(),
        voice_id: "rachel".to_string(),
        initial_greeting: "Hello, how can I help?".to_string(),
        ..AgentConfig::default()
    }
}

fn start_call(options: HarnessOptions) -> Harness {
    let mut chat = FakeChat::new(options.replies);
    chat.delay = options.chat_delay;
    let chat = Arc::new(chat);
    let synth = Arc::new(PacedSynthesizer::new(
        options.synth_chunks,
        options.synth_chunk_delay,
    ));
    let log = Arc::new(MemoryCallLog::new());
    let store: Arc<dyn SessionStore> = if options.failing_store {
        Arc::new(FailingStore)
    } else {
        Arc::new(InMemorySessionStore::new())
    };

    let (event_tx, event_rx) = mpsc::channel(64);
    let recognizer = Arc::new(ScriptedRecognizer {
        stream: Mutex::new(Some(event_rx)),
    });

    let services = SystemServices {
        recognizer,
        chat: chat.clone(),
        synthesizer: synth.clone(),
        store: store.clone(),
        call_log: log.clone(),
    };

    let mut settings = Settings::default();
    settings.session.grace_ms = 500;
    settings.session.utterance_cap_secs = options.utterance_cap_secs;

    let (media_tx, media_rx) = mpsc::channel(16);
    let frames = Arc::new(Mutex::new(Vec::new()));
    let source = ChannelSource { rx: media_rx };
    let sink = RecordingSink {
        frames: frames.clone(),
    };

    let setup = CallSetup {
        record: CallRecord::new("call-1", CallDirection::Inbound, "+15550002", "+15550001", "agent-a"),
        stream_sid: Some("call-1".to_string()),
        agent: agent(),
    };

    let call = tokio::spawn(async move {
        run_call(setup, services, &settings, source, sink).await
    });

    Harness {
        chat,
        synth,
        log,
        store,
        events: event_tx,
        media: Some(media_tx),
        frames,
        call,
    }
}

impl Harness {
    fn media_frame_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|frame| matches!(frame, MediaMessage::Media { .. }))
            .count()
    }

    fn segments(&self) -> Vec<(u32, Speaker, String)> {
        self.log
            .segments("call-1")
            .into_iter()
            .map(|stored| {
                (
                    stored.sequence_number,
                    stored.segment.speaker,
                    stored.segment.text,
                )
            })
            .collect()
    }

    /// Hangs up by closing the media transport.
    fn hang_up(&mut self) {
        self.media = None;
    }

    async fn finish(mut self) -> CallRecord {
        self.hang_up();
        tokio::time::timeout(Duration::from_secs(5), self.call)
            .await
            .expect("session ended within grace")
            .expect("session task completed")
    }
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn final_transcript(text: &str) -> RecognitionEvent {
    RecognitionEvent::Final {
        text: text.to_string(),
        duration: 2.0,
        confidence: 0.95,
    }
}

// Scenarios

#[tokio::test]
async fn happy_path_greeting_turn_and_reply() {
    let harness = start_call(HarnessOptions {
        replies: vec![FakeChat::reply("It is sunny.")],
        ..Default::default()
    });

    // Greeting is synthesized first and lands in the log when it completes.
    wait_until("greeting segment", || !harness.segments().is_empty()).await;
    assert_eq!(harness.synth.requests.lock()[0], "Hello, how can I help?");
    assert!(harness.media_frame_count() > 0);

    harness
        .events
        .send(final_transcript("what is the weather"))
        .await
        .unwrap();

    wait_until("assistant reply segment", || harness.segments().len() >= 3).await;

    let segments = harness.segments();
    assert_eq!(
        segments,
        vec![
            (1, Speaker::Assistant, "Hello, how can I help?".to_string()),
            (2, Speaker::User, "what is the weather".to_string()),
            (3, Speaker::Assistant, "It is sunny.".to_string()),
        ]
    );
    assert_eq!(harness.chat.messages.lock().as_slice(), ["what is the weather"]);

    let record = harness.finish().await;
    assert_eq!(record.status, CallStatus::EndedByPeer);
    assert!(record.ended_at.is_some());
}

#[tokio::test]
async fn barge_in_cancels_playback_and_marks_truncation() {
    // A long, slow greeting so the barge-in lands mid-flight.
    let harness = start_call(HarnessOptions {
        synth_chunks: 200,
        synth_chunk_delay: Duration::from_millis(20),
        ..Default::default()
    });

    wait_until("greeting audio flowing", || harness.media_frame_count() > 0).await;

    harness
        .events
        .send(RecognitionEvent::SpeechStarted)
        .await
        .unwrap();

    // Playback must stop promptly: frame count settles and stays put.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_cancel = harness.media_frame_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        harness.media_frame_count(),
        after_cancel,
        "no further greeting chunks after barge-in"
    );

    // The greeting turn is recorded and marked truncated in the store copy.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(turns)) = harness
            .store
            .get("call-1", SessionField::ConversationMemory)
            .await
        {
            let truncated = turns
                .as_array()
                .is_some_and(|turns| turns.iter().any(|turn| turn["truncated"] == true));
            if truncated {
                break;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for truncated turn in store snapshot");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let segments = harness.segments();
    assert_eq!(segments[0].1, Speaker::Assistant);

    harness.finish().await;
}

#[tokio::test]
async fn recognizer_error_speaks_audio_trouble_fallback() {
    let harness = start_call(HarnessOptions::default());

    wait_until("greeting done", || !harness.segments().is_empty()).await;

    harness
        .events
        .send(RecognitionEvent::Error {
            kind: voxline_core::RecognitionErrorKind::Transport,
            message: "stream reset".to_string(),
        })
        .await
        .unwrap();

    wait_until("fallback synthesized", || harness.synth.requests.lock().len() >= 2).await;
    assert!(harness.synth.requests.lock()[1].contains("trouble with my audio connection"));

    // The conversation continues: a later final still reaches the model.
    harness
        .events
        .send(final_transcript("are you still there"))
        .await
        .unwrap();
    wait_until("model called after recovery", || {
        !harness.chat.messages.lock().is_empty()
    })
    .await;

    harness.finish().await;
}

#[tokio::test]
async fn policy_refusal_substitutes_canned_utterance() {
    let harness = start_call(HarnessOptions {
        replies: vec![Err(ChatFailure::PolicyRefusal)],
        ..Default::default()
    });

    wait_until("greeting done", || !harness.segments().is_empty()).await;
    harness
        .events
        .send(final_transcript("policy violating text"))
        .await
        .unwrap();

    wait_until("refusal spoken and logged", || harness.segments().len() >= 3).await;
    let segments = harness.segments();
    let reply = &segments[2];
    assert_eq!(reply.1, Speaker::Assistant);
    assert!(reply.2.contains("content policy"));

    harness.finish().await;
}

#[tokio::test]
async fn hangup_during_thinking_cancels_llm_within_grace() {
    let mut harness = start_call(HarnessOptions {
        chat_delay: Duration::from_secs(10),
        ..Default::default()
    });

    wait_until("greeting done", || !harness.segments().is_empty()).await;
    harness
        .events
        .send(final_transcript("tell me a story"))
        .await
        .unwrap();
    wait_until("model request in flight", || {
        !harness.chat.messages.lock().is_empty()
    })
    .await;

    let hangup_at = tokio::time::Instant::now();
    harness.hang_up();
    let record = tokio::time::timeout(Duration::from_secs(3), harness.call)
        .await
        .expect("session ended promptly after hangup")
        .expect("session task completed");

    assert_eq!(record.status, CallStatus::EndedByPeer);
    assert!(hangup_at.elapsed() < Duration::from_secs(2));
    // No reply was synthesized: only the greeting went through TTS.
    assert_eq!(harness.synth.requests.lock().len(), 1);
}

#[tokio::test]
async fn store_outage_degrades_without_failing_the_call() {
    let harness = start_call(HarnessOptions {
        replies: vec![FakeChat::reply("Noted.")],
        failing_store: true,
        ..Default::default()
    });

    wait_until("greeting done", || !harness.segments().is_empty()).await;
    harness
        .events
        .send(final_transcript("remember this"))
        .await
        .unwrap();

    // The durable log still receives every segment.
    wait_until("turn logged despite store outage", || {
        harness.segments().len() >= 3
    })
    .await;

    let record = harness.finish().await;
    assert!(record.status.is_terminal());
}

#[tokio::test]
async fn empty_final_does_not_reach_the_model() {
    let harness = start_call(HarnessOptions::default());

    wait_until("greeting done", || !harness.segments().is_empty()).await;
    harness.events.send(final_transcript("   ")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(harness.chat.messages.lock().is_empty());
    assert_eq!(harness.segments().len(), 1);

    harness.finish().await;
}

#[tokio::test]
async fn stalled_interim_is_promoted_to_a_final() {
    let harness = start_call(HarnessOptions {
        replies: vec![FakeChat::reply("Got it.")],
        utterance_cap_secs: 1,
        ..Default::default()
    });

    wait_until("greeting done", || !harness.segments().is_empty()).await;
    harness
        .events
        .send(RecognitionEvent::Interim {
            text: "I was saying something long".to_string(),
        })
        .await
        .unwrap();

    // No final ever arrives; the utterance window promotes the interim.
    wait_until("interim promoted to model call", || {
        !harness.chat.messages.lock().is_empty()
    })
    .await;
    assert_eq!(
        harness.chat.messages.lock().as_slice(),
        ["I was saying something long"]
    );

    harness.finish().await;
}

#[tokio::test]
async fn peer_stop_frame_ends_the_session_cleanly() {
    let harness = start_call(HarnessOptions::default());
    wait_until("greeting done", || !harness.segments().is_empty()).await;

    harness
        .media
        .as_ref()
        .expect("media open")
        .send(MediaMessage::Stop)
        .await
        .unwrap();

    let record = tokio::time::timeout(Duration::from_secs(3), harness.call)
        .await
        .expect("session ended after stop frame")
        .expect("session task completed");
    assert_eq!(record.status, CallStatus::EndedByPeer);
    assert!(record.duration_seconds.is_some());
}
