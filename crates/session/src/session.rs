//! Session lifecycle: supervised task group around one call.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voxline_config::Settings;
use voxline_core::{
    AgentConfig, CallLog, CallRecord, CallStatus, RecognitionParams, SessionField, SessionStore,
    SpeechRecognizer, SystemServices, TranscriptSegment,
};
use voxline_transport::{
    run_egress, run_ingress, EgressHandle, IngressEnd, MediaSink, MediaSource,
};

use crate::controller::{ControllerArgs, TurnController};
use crate::{pump_recognition, ControllerEvent};

/// Everything the webhook resolved before the media session opened.
pub struct CallSetup {
    /// The call record as created at webhook time (status `answered`).
    pub record: CallRecord,
    /// Opaque stream identifier echoed on outbound media frames.
    pub stream_sid: Option<String>,
    /// Immutable agent snapshot for the call.
    pub agent: AgentConfig,
}

/// Runs one call to completion over an established media transport and
/// returns the finalized call record.
///
/// Exactly one of these may run per call identifier. The ingress, egress,
/// recognizer pump, and segment logger are supervised children of one
/// cancellation token; teardown cancels the tree and gives every child the
/// configured grace window before declaring it leaked.
pub async fn run_call(
    setup: CallSetup,
    services: SystemServices,
    settings: &Settings,
    source: impl MediaSource,
    sink: impl MediaSink,
) -> CallRecord {
    let CallSetup {
        mut record,
        stream_sid,
        agent,
    } = setup;
    let call_id = record.id.clone();
    let limits = settings.session;
    let root = CancellationToken::new();

    tracing::info!(call_id = %call_id, agent_id = %agent.id, "session starting");

    // Channel graph: transport frames → InboundAudio → recognizer events →
    // controller inbox; playback chunks → egress frames → transport.
    let (audio_tx, audio_rx) = mpsc::channel(settings.media.inbound_buffer_frames);
    let (egress_tx, egress_rx) = mpsc::channel(settings.media.egress_buffer_frames);
    let (inbox_tx, inbox_rx) = mpsc::channel(64);
    let (segment_tx, segment_rx) = mpsc::channel(64);

    let active_utterance = Arc::new(AtomicU64::new(0));
    let egress_handle = EgressHandle::new(egress_tx, active_utterance.clone());

    // Open the recognizer stream before spawning anything; a recognizer
    // that cannot even connect fails the call up front.
    let params = RecognitionParams::from_agent(
        &agent,
        settings.media.sample_rate,
        settings.media.channels,
    );
    let events = match services.recognizer.open_stream(params, audio_rx).await {
        Ok(events) => events,
        Err(e) => {
            tracing::error!(call_id = %call_id, error = %e, "recognizer unavailable");
            record.finalize(CallStatus::Failed);
            finalize(&services, &record).await;
            return record;
        }
    };

    let ingress = {
        let inbox = inbox_tx.clone();
        let cancel = root.child_token();
        let call_id = call_id.clone();
        tokio::spawn(async move {
            let end = run_ingress(source, audio_tx, cancel).await;
            match end {
                IngressEnd::Cancelled => {}
                IngressEnd::PeerStopped => {
                    tracing::info!(call_id = %call_id, "peer stopped the stream");
                    let _ = inbox.send(ControllerEvent::TransportClosed).await;
                }
                IngressEnd::PeerError(message) => {
                    tracing::warn!(call_id = %call_id, error = %message, "peer reported an error");
                    let _ = inbox.send(ControllerEvent::TransportClosed).await;
                }
                IngressEnd::TransportClosed => {
                    let _ = inbox.send(ControllerEvent::TransportClosed).await;
                }
            }
        })
    };

    let egress = {
        let inbox = inbox_tx.clone();
        let cancel = root.child_token();
        let active = active_utterance.clone();
        let stream_sid = stream_sid.clone();
        tokio::spawn(async move {
            let end = run_egress(sink, egress_rx, stream_sid, active, cancel).await;
            if end == voxline_transport::EgressEnd::SinkClosed {
                let _ = inbox.send(ControllerEvent::TransportClosed).await;
            }
        })
    };

    let pump = tokio::spawn(pump_recognition(events, inbox_tx.clone()));
    let logger = tokio::spawn(run_segment_logger(
        services.clone(),
        call_id.clone(),
        segment_rx,
    ));

    let controller = TurnController::new(ControllerArgs {
        call_id: call_id.clone(),
        config: agent,
        services: services.clone(),
        limits,
        sample_rate: settings.media.sample_rate,
        ttfb: Duration::from_millis(settings.tts.ttfb_ms),
        egress: egress_handle,
        inbox: inbox_rx,
        inbox_tx,
        segments: segment_tx,
        cancel: root.child_token(),
    });

    let status = controller.run().await;

    // Teardown: cancel the tree, then give each child the grace window.
    root.cancel();
    let grace = Duration::from_millis(limits.grace_ms);
    join_with_grace("ingress", ingress, grace).await;
    join_with_grace("egress", egress, grace).await;
    join_with_grace("recognition-pump", pump, grace).await;
    join_with_grace("segment-logger", logger, grace).await;

    record.finalize(status);
    finalize(&services, &record).await;

    tracing::info!(call_id = %call_id, status = ?record.status,
        duration_seconds = record.duration_seconds, "session ended");
    record
}

/// Writes the terminal call record and clears the per-call store state.
async fn finalize(services: &SystemServices, record: &CallRecord) {
    if let Err(e) = services.call_log.upsert_call(record).await {
        tracing::warn!(call_id = %record.id, error = %e, "terminal call record write failed");
    }
    if let Err(e) = services.store.clear(&record.id).await {
        tracing::warn!(call_id = %record.id, error = %e, "session store cleanup failed");
    }
}

async fn join_with_grace(name: &str, handle: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, handle).await.is_err() {
        tracing::warn!(task = name, "task failed to stop within grace window, leaked");
        metrics::counter!("voxline_task_leaks_total").increment(1);
    }
}

/// Drains transcript segments in order into the durable log and the session
/// store. Runs until the controller drops its sender.
async fn run_segment_logger(
    services: SystemServices,
    call_id: String,
    mut segments: mpsc::Receiver<TranscriptSegment>,
) {
    while let Some(segment) = segments.recv().await {
        if let Err(e) = services.store.append_segment(&call_id, &segment).await {
            tracing::warn!(call_id = %call_id, error = %e, "store transcript append failed");
        }
        if let Err(e) = services.call_log.append_segment(segment).await {
            tracing::warn!(call_id = %call_id, error = %e, "durable segment write failed");
        }
    }
    // Seed the terminal status for late observers; the store is cleared at
    // finalize, so this only matters if teardown races a reader.
    let _ = services
        .store
        .set(
            &call_id,
            SessionField::CurrentStatus,
            serde_json::json!("ended"),
            Duration::from_secs(60),
        )
        .await;
}
