//! The playback task: one synthesized utterance from TTS to egress.
//!
//! At most one playback task is alive per session at any instant; the
//! controller enforces that. The speaking flag is set here immediately
//! before the first chunk is handed to egress and cleared after the last
//! one, or by the controller once cancellation is acknowledged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use voxline_core::{silence_chunk, SpeechSynthesizer, SynthesisRequest, SILENCE_PLACEHOLDER_MS};
use voxline_transport::EgressFrame;

use crate::ControllerEvent;

pub(crate) struct PlaybackArgs {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub request: SynthesisRequest,
    pub egress: mpsc::Sender<EgressFrame>,
    pub utterance: u64,
    pub speaking: Arc<AtomicBool>,
    pub events: mpsc::Sender<ControllerEvent>,
    pub cancel: CancellationToken,
    pub ttfb: Duration,
}

/// Handle to the in-flight playback task. Cancellation is idempotent.
pub(crate) struct PlaybackHandle {
    pub utterance: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PlaybackHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the task to acknowledge cancellation (or finish) within
    /// `budget`. On timeout the task is detached and left to the token.
    pub async fn wait(self, budget: Duration) -> bool {
        timeout(budget, self.join).await.is_ok()
    }
}

pub(crate) fn start(args: PlaybackArgs) -> PlaybackHandle {
    let cancel = args.cancel.clone();
    let utterance = args.utterance;
    let join = tokio::spawn(run_playback(args));
    PlaybackHandle {
        utterance,
        cancel,
        join,
    }
}

async fn run_playback(args: PlaybackArgs) {
    let PlaybackArgs {
        synthesizer,
        request,
        egress,
        utterance,
        speaking,
        events,
        cancel,
        ttfb,
    } = args;
    let sample_rate = request.sample_rate;

    // The synthesis stream gets its own child token so a TTFB miss can kill
    // it without tearing down this task.
    let synth_cancel = cancel.child_token();
    let chunks = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        chunks = synthesizer.synthesize(request, synth_cancel.clone()) => chunks,
    };

    let mut chunks = match chunks {
        Ok(chunks) => Some(chunks),
        Err(e) => {
            tracing::error!(error = %e, "synthesis failed to start, using placeholder");
            None
        }
    };

    let first = match chunks.as_mut() {
        Some(rx) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                first = timeout(ttfb, rx.recv()) => match first {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => {
                        tracing::warn!("synthesis produced no audio, using placeholder");
                        chunks = None;
                        placeholder(sample_rate)
                    }
                    Err(_) => {
                        tracing::warn!(budget_ms = ttfb.as_millis() as u64,
                            "synthesis missed first-byte budget, using placeholder");
                        metrics::counter!("voxline_tts_ttfb_misses_total").increment(1);
                        synth_cancel.cancel();
                        chunks = None;
                        placeholder(sample_rate)
                    }
                },
            }
        }
        None => placeholder(sample_rate),
    };

    // The flag must be set before the first chunk can leave egress.
    speaking.store(true, Ordering::Release);
    let _ = events
        .send(ControllerEvent::PlaybackStarted { utterance })
        .await;

    if !forward(&egress, utterance, first, &cancel).await {
        return;
    }

    if let Some(mut rx) = chunks {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                chunk = rx.recv() => chunk,
            };
            match chunk {
                Some(bytes) => {
                    if !forward(&egress, utterance, bytes, &cancel).await {
                        return;
                    }
                }
                None => break,
            }
        }
    }

    // Natural completion: last chunk written, clear the flag ourselves.
    speaking.store(false, Ordering::Release);
    let _ = events
        .send(ControllerEvent::PlaybackFinished { utterance })
        .await;
}

fn placeholder(sample_rate: u32) -> Bytes {
    silence_chunk(SILENCE_PLACEHOLDER_MS, sample_rate)
}

/// Sends one frame to egress, observing cancellation. Returns false when
/// the playback should stop.
async fn forward(
    egress: &mpsc::Sender<EgressFrame>,
    utterance: u64,
    audio: Bytes,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = egress.send(EgressFrame { utterance, audio }) => sent.is_ok(),
    }
}
