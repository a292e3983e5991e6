//! The turn controller state machine.
//!
//! States: `Greeting` (the agent's opening line is playing), `Listening`,
//! `Thinking` (a language-model request is in flight), `Speaking`, and
//! `Terminating`. The controller owns all mutable call state: conversation
//! memory, the speaking flag, and the current playback handle. It never
//! surfaces an error to the caller; every failure becomes either synthesized
//! speech or a clean teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voxline_config::SessionLimits;
use voxline_core::{
    AgentConfig, CallStatus, ChatFailure, ChatModel, ChatParams, RecognitionEvent, SessionField,
    SessionStore, Speaker, SynthesisRequest, SystemServices, TokenUsage, TranscriptSegment,
    TurnRecord,
};
use voxline_transport::EgressHandle;

use crate::playback::{self, PlaybackArgs, PlaybackHandle};
use crate::ControllerEvent;

/// Turn-taking state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Greeting,
    Listening,
    Thinking,
    Speaking,
    Terminating,
}

/// Spoken when the recognizer stream fails and is being re-established.
const ASR_TROUBLE_UTTERANCE: &str =
    "I'm having trouble with my audio connection. Please give me a moment.";

/// Spoken in place of a reply the model refused on policy grounds.
const POLICY_REFUSAL_UTTERANCE: &str =
    "I'm sorry, I cannot process that request due to content policy. Can I help with something else?";

/// Spoken when the model returned nothing usable.
const REPHRASE_UTTERANCE: &str =
    "I'm sorry, I'm having trouble understanding. Could you please rephrase?";

/// Spoken when the model failed outright.
const INTERNAL_ERROR_UTTERANCE: &str =
    "I apologize, I encountered an internal error. Please try again later.";

fn fallback_for(failure: &ChatFailure) -> &'static str {
    match failure {
        ChatFailure::PolicyRefusal => POLICY_REFUSAL_UTTERANCE,
        ChatFailure::Empty => REPHRASE_UTTERANCE,
        ChatFailure::Transient(_) | ChatFailure::Fatal(_) => INTERNAL_ERROR_UTTERANCE,
    }
}

pub(crate) struct ControllerArgs {
    pub call_id: String,
    pub config: AgentConfig,
    pub services: SystemServices,
    pub limits: SessionLimits,
    pub sample_rate: u32,
    pub ttfb: Duration,
    pub egress: EgressHandle,
    pub inbox: mpsc::Receiver<ControllerEvent>,
    pub inbox_tx: mpsc::Sender<ControllerEvent>,
    pub segments: mpsc::Sender<TranscriptSegment>,
    pub cancel: CancellationToken,
}

/// The utterance currently owned by the playback task.
struct ActiveUtterance {
    utterance: u64,
    text: String,
    usage: Option<TokenUsage>,
    /// Set once the assistant turn is appended (at playback start).
    history_index: Option<usize>,
}

struct LlmTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

enum Step {
    Event(ControllerEvent),
    UtteranceCap,
    Inactive,
    Cancelled,
    InboxClosed,
}

pub(crate) struct TurnController {
    call_id: String,
    config: AgentConfig,
    services: SystemServices,
    limits: SessionLimits,
    sample_rate: u32,
    ttfb: Duration,
    state: TurnState,
    memory: voxline_core::ConversationMemory,
    speaking: Arc<AtomicBool>,
    playback: Option<PlaybackHandle>,
    active: Option<ActiveUtterance>,
    llm: Option<LlmTask>,
    egress: EgressHandle,
    inbox: mpsc::Receiver<ControllerEvent>,
    inbox_tx: mpsc::Sender<ControllerEvent>,
    segments: mpsc::Sender<TranscriptSegment>,
    cancel: CancellationToken,
    last_interim: Option<String>,
    utterance_deadline: Option<Instant>,
    last_activity: Instant,
    outcome: CallStatus,
}

async fn maybe_sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl TurnController {
    pub fn new(args: ControllerArgs) -> Self {
        Self {
            call_id: args.call_id,
            config: args.config,
            services: args.services,
            limits: args.limits,
            sample_rate: args.sample_rate,
            ttfb: args.ttfb,
            state: TurnState::Greeting,
            memory: voxline_core::ConversationMemory::new(),
            speaking: Arc::new(AtomicBool::new(false)),
            playback: None,
            active: None,
            llm: None,
            egress: args.egress,
            inbox: args.inbox,
            inbox_tx: args.inbox_tx,
            segments: args.segments,
            cancel: args.cancel,
            last_interim: None,
            utterance_deadline: None,
            last_activity: Instant::now(),
            outcome: CallStatus::Completed,
        }
    }

    /// Runs the state machine to completion and returns the call outcome.
    pub async fn run(mut self) -> CallStatus {
        tracing::info!(call_id = %self.call_id, "turn controller started, speaking greeting");
        let greeting = self.config.initial_greeting.clone();
        self.speak(greeting, None).await;

        loop {
            let utterance_deadline = self.utterance_deadline;
            let inactivity_deadline =
                self.last_activity + Duration::from_secs(self.limits.inactivity_secs);

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                event = self.inbox.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::InboxClosed,
                },
                _ = maybe_sleep_until(utterance_deadline) => Step::UtteranceCap,
                _ = tokio::time::sleep_until(inactivity_deadline) => Step::Inactive,
            };

            match step {
                Step::Event(event) => self.handle_event(event).await,
                Step::UtteranceCap => {
                    self.utterance_deadline = None;
                    if let Some(text) = self.last_interim.take() {
                        tracing::warn!(call_id = %self.call_id,
                            "utterance window elapsed, promoting interim to final");
                        self.handle_final(text, 0.0, 0.0).await;
                    }
                }
                Step::Inactive => {
                    tracing::info!(call_id = %self.call_id, "inactivity cap reached, ending call");
                    self.state = TurnState::Terminating;
                }
                Step::Cancelled | Step::InboxClosed => {
                    self.state = TurnState::Terminating;
                }
            }

            if self.state == TurnState::Terminating {
                break;
            }
        }

        self.shutdown().await;
        self.outcome
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Recognition(event) => self.handle_recognition(event).await,
            ControllerEvent::PlaybackStarted { utterance } => self.handle_playback_started(utterance),
            ControllerEvent::PlaybackFinished { utterance } => {
                self.handle_playback_finished(utterance)
            }
            ControllerEvent::LlmFinished { result } => self.handle_llm_finished(result).await,
            ControllerEvent::TransportClosed => {
                if self.state != TurnState::Terminating {
                    tracing::info!(call_id = %self.call_id, "peer closed the media transport");
                    self.outcome = CallStatus::EndedByPeer;
                    self.state = TurnState::Terminating;
                }
            }
        }
    }

    async fn handle_recognition(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::SpeechStarted => {
                // The in-process flag is authoritative for barge-in; the
                // store copy is for observers only.
                if self.speaking.load(Ordering::Acquire) && self.playback.is_some() {
                    tracing::info!(call_id = %self.call_id, "barge-in detected");
                    metrics::counter!("voxline_barge_ins_total").increment(1);
                    self.interrupt_playback().await;
                    if matches!(self.state, TurnState::Greeting | TurnState::Speaking) {
                        self.state = TurnState::Listening;
                    }
                }
            }
            RecognitionEvent::Interim { text } => {
                self.touch();
                if !text.trim().is_empty() {
                    if self.utterance_deadline.is_none() {
                        self.utterance_deadline = Some(
                            Instant::now() + Duration::from_secs(self.limits.utterance_cap_secs),
                        );
                    }
                    self.last_interim = Some(text);
                }
            }
            RecognitionEvent::Final {
                text,
                duration,
                confidence,
            } => {
                self.touch();
                self.utterance_deadline = None;
                self.last_interim = None;
                self.handle_final(text, duration, confidence).await;
            }
            RecognitionEvent::Error { kind, message } => {
                self.touch();
                tracing::warn!(call_id = %self.call_id, ?kind, error = %message,
                    state = ?self.state, "recognizer error");
                // Only Listening has a defined recovery: speak the fallback
                // and stay put. In any other state the recognizer's own
                // reconnect is the whole story; starting a fallback playback
                // here would interrupt live speech or collide with the
                // in-flight reply.
                if self.state == TurnState::Listening {
                    self.speak(ASR_TROUBLE_UTTERANCE.to_string(), None).await;
                }
            }
            RecognitionEvent::Closed => {
                if self.state != TurnState::Terminating {
                    tracing::error!(call_id = %self.call_id, "recognizer stream closed, failing call");
                    self.outcome = CallStatus::Failed;
                    self.state = TurnState::Terminating;
                }
            }
        }
    }

    async fn handle_final(&mut self, text: String, duration: f64, confidence: f64) {
        let text = text.trim().to_string();
        if text.is_empty() {
            // The recognizer finalizes silence as an empty transcript.
            return;
        }
        if self.state != TurnState::Listening {
            tracing::debug!(call_id = %self.call_id, state = ?self.state,
                "final transcript outside listening dropped");
            return;
        }

        tracing::info!(call_id = %self.call_id, chars = text.len(), "user turn finalized");
        self.memory
            .push(TurnRecord::user(text.clone(), duration, confidence));
        self.persist_memory();

        let mut segment = TranscriptSegment::new(&self.call_id, Speaker::User, &text);
        segment.asr_seconds = Some(duration);
        self.log_segment(segment);

        self.state = TurnState::Thinking;
        self.launch_llm(text);
    }

    fn launch_llm(&mut self, user_text: String) {
        let chat = self.services.chat.clone();
        let system_prompt = self.config.system_prompt.clone();
        let mut history = self.memory.chat_history();
        // The user turn just appended travels as the message itself.
        history.pop();
        let params = ChatParams {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let cancel = self.cancel.child_token();
        let events = self.inbox_tx.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let request = async {
                let mut session = chat
                    .start_chat(&system_prompt, &history)
                    .await
                    .map_err(|e| ChatFailure::Fatal(e.to_string()))?;
                chat.send(&mut session, &user_text, params).await
            };
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => {}
                result = request => {
                    let _ = events.send(ControllerEvent::LlmFinished { result }).await;
                }
            }
        });

        self.llm = Some(LlmTask { handle, cancel });
    }

    async fn handle_llm_finished(
        &mut self,
        result: std::result::Result<voxline_core::ChatReply, ChatFailure>,
    ) {
        if self.state != TurnState::Thinking {
            tracing::debug!(call_id = %self.call_id, state = ?self.state,
                "language model result outside thinking dropped");
            return;
        }
        self.llm = None;

        let (text, usage) = match result {
            Ok(reply) => {
                if !reply.tool_calls.is_empty() {
                    tracing::info!(call_id = %self.call_id, tools = reply.tool_calls.len(),
                        "model proposed tool calls");
                }
                let usage = reply.usage;
                (reply.text, usage)
            }
            Err(failure) => {
                tracing::warn!(call_id = %self.call_id, failure = %failure,
                    "language model failure, speaking fallback");
                (fallback_for(&failure).to_string(), None)
            }
        };

        self.state = TurnState::Speaking;
        self.speak(text, usage).await;
    }

    fn handle_playback_started(&mut self, utterance: u64) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.utterance != utterance || active.history_index.is_some() {
            return;
        }

        // The assistant turn is recorded once playback starts, not when it
        // completes, so a barge-in still leaves a record of what was said.
        let mut turn = TurnRecord::assistant(active.text.clone());
        if let Some(usage) = active.usage {
            turn = turn.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        active.history_index = Some(self.memory.push(turn));
        self.persist_memory();
    }

    fn handle_playback_finished(&mut self, utterance: u64) {
        self.touch();
        match self.active.take() {
            Some(active) if active.utterance == utterance => {
                self.playback = None;
                self.finish_assistant(active, false);
                if matches!(self.state, TurnState::Greeting | TurnState::Speaking) {
                    self.state = TurnState::Listening;
                }
            }
            other => self.active = other,
        }
    }

    /// Cancels the in-flight playback and settles its bookkeeping. Used for
    /// barge-in and whenever a new utterance supersedes the current one.
    async fn interrupt_playback(&mut self) {
        let Some(playback) = self.playback.take() else {
            return;
        };
        playback.cancel();
        let budget = Duration::from_millis(self.limits.playback_cancel_ms);
        if !playback.wait(budget).await {
            tracing::warn!(call_id = %self.call_id,
                "playback task missed the cancellation budget, detached");
        }
        self.egress.discard_current();
        self.speaking.store(false, Ordering::Release);
        self.store_speaking(false);
        if let Some(active) = self.active.take() {
            self.finish_assistant(active, true);
        }
    }

    /// Settles an utterance once playback is over: marks truncation in
    /// history and writes the assistant transcript segment. An utterance
    /// cancelled before its first chunk never reached the caller and leaves
    /// no trace.
    fn finish_assistant(&mut self, active: ActiveUtterance, truncated: bool) {
        let Some(index) = active.history_index else {
            return;
        };
        if truncated {
            self.memory.mark_truncated(index);
            self.persist_memory();
        }

        let mut segment = TranscriptSegment::new(&self.call_id, Speaker::Assistant, &active.text);
        if let Some(usage) = active.usage {
            segment.prompt_tokens = Some(usage.prompt_tokens);
            segment.completion_tokens = Some(usage.completion_tokens);
        }
        self.log_segment(segment);
    }

    /// Launches playback for one utterance. At most one playback task exists
    /// at any moment; a live one is cancelled first.
    async fn speak(&mut self, text: String, usage: Option<TokenUsage>) {
        if self.playback.is_some() {
            self.interrupt_playback().await;
        }

        let utterance = self.egress.begin_utterance();
        let request = SynthesisRequest {
            text: text.clone(),
            voice_id: self.config.voice_id.clone(),
            voice_settings: self.config.voice_settings.clone(),
            sample_rate: self.sample_rate,
        };
        let handle = playback::start(PlaybackArgs {
            synthesizer: self.services.synthesizer.clone(),
            request,
            egress: self.egress.sender(),
            utterance,
            speaking: self.speaking.clone(),
            events: self.inbox_tx.clone(),
            cancel: self.cancel.child_token(),
            ttfb: self.ttfb,
        });
        self.playback = Some(handle);
        self.active = Some(ActiveUtterance {
            utterance,
            text,
            usage,
            history_index: None,
        });
        self.store_speaking(true);
    }

    async fn shutdown(&mut self) {
        let grace = Duration::from_millis(self.limits.grace_ms);

        if let Some(llm) = self.llm.take() {
            llm.cancel.cancel();
            if tokio::time::timeout(grace, llm.handle).await.is_err() {
                tracing::warn!(call_id = %self.call_id, "language model task leaked past grace");
            }
        }

        if let Some(playback) = self.playback.take() {
            playback.cancel();
            if !playback.wait(grace).await {
                tracing::warn!(call_id = %self.call_id, "playback task leaked past grace");
            }
            self.egress.discard_current();
            self.speaking.store(false, Ordering::Release);
            if let Some(active) = self.active.take() {
                self.finish_assistant(active, true);
            }
        }

        tracing::info!(call_id = %self.call_id, outcome = ?self.outcome,
            turns = self.memory.turn_count(), "turn controller stopped");
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Best-effort store write of the speaking flag; the local atomic stays
    /// authoritative when the store is unavailable.
    fn store_speaking(&self, value: bool) {
        let store = self.services.store.clone();
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            let field = SessionField::IsAiSpeaking;
            if let Err(e) = store
                .set(&call_id, field, serde_json::json!(value), field.default_ttl())
                .await
            {
                tracing::warn!(call_id = %call_id, error = %e,
                    "session store write failed, continuing with local flag");
            }
        });
    }

    /// Best-effort store write of the conversation history snapshot.
    fn persist_memory(&self) {
        let Ok(value) = serde_json::to_value(self.memory.turns()) else {
            return;
        };
        let store = self.services.store.clone();
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            let field = SessionField::ConversationMemory;
            if let Err(e) = store.set(&call_id, field, value, field.default_ttl()).await {
                tracing::warn!(call_id = %call_id, error = %e,
                    "conversation memory snapshot failed");
            }
        });
    }

    /// Hands a segment to the ordered logger task. Durability is
    /// best-effort: a backlogged logger drops rather than stalling turns.
    fn log_segment(&self, segment: TranscriptSegment) {
        if self.segments.try_send(segment).is_err() {
            tracing::warn!(call_id = %self.call_id,
                "segment logger backlogged, dropping transcript segment");
        }
    }
}
