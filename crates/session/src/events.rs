//! Controller inbox events and the recognition pump.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use voxline_core::{ChatFailure, ChatReply, RecognitionEvent};

/// Everything the turn controller reacts to, on one bounded inbox.
#[derive(Debug)]
pub(crate) enum ControllerEvent {
    Recognition(RecognitionEvent),
    /// A playback task emitted its first chunk.
    PlaybackStarted { utterance: u64 },
    /// A playback task wrote its last chunk and cleared the speaking flag.
    PlaybackFinished { utterance: u64 },
    /// The in-flight language-model request resolved.
    LlmFinished {
        result: std::result::Result<ChatReply, ChatFailure>,
    },
    /// The media transport is gone (peer stop, peer error, or closure).
    TransportClosed,
}

/// Forwards recognition events onto the controller inbox.
///
/// The inbox is bounded. When it is full, interim transcripts coalesce: the
/// newest replaces the one still waiting, so the oldest interim is dropped.
/// Finals and lifecycle events always block until delivered.
pub(crate) async fn pump_recognition(
    mut events: mpsc::Receiver<RecognitionEvent>,
    inbox: mpsc::Sender<ControllerEvent>,
) {
    let mut pending_interim: Option<RecognitionEvent> = None;

    loop {
        if let Some(interim) = pending_interim.take() {
            match inbox.try_send(ControllerEvent::Recognition(interim)) {
                Ok(()) => {}
                Err(TrySendError::Full(ControllerEvent::Recognition(interim))) => {
                    pending_interim = Some(interim);
                }
                Err(TrySendError::Full(_)) => unreachable!("pump only re-queues recognition events"),
                Err(TrySendError::Closed(_)) => return,
            }
        }

        let Some(event) = events.recv().await else {
            if let Some(interim) = pending_interim.take() {
                let _ = inbox.send(ControllerEvent::Recognition(interim)).await;
            }
            return;
        };

        if event.is_droppable() {
            if pending_interim.replace(event).is_some() {
                metrics::counter!("voxline_interims_dropped_total").increment(1);
            }
        } else {
            if let Some(interim) = pending_interim.take() {
                if inbox
                    .send(ControllerEvent::Recognition(interim))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if inbox.send(ControllerEvent::Recognition(event)).await.is_err() {
                return;
            }
        }
    }
}
