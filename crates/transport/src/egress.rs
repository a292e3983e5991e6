//! Egress: synthesized PCM in, envelope frames out.
//!
//! Every audio frame carries the utterance sequence it belongs to. The
//! controller bumps the active sequence when it cancels a playback, so a
//! straggler chunk from a cancelled reply is dropped here instead of
//! reaching the peer after its successor has started.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::frame::MediaMessage;
use crate::ws::MediaSink;

/// One frame queued for the peer.
#[derive(Debug, Clone)]
pub struct EgressFrame {
    /// Utterance sequence this chunk belongs to.
    pub utterance: u64,
    pub audio: Bytes,
}

/// How the egress loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressEnd {
    /// All producers dropped their senders.
    Drained,
    /// The peer-side sink failed; remaining frames were discarded.
    SinkClosed,
    /// The session was cancelled locally.
    Cancelled,
}

/// Producer-side handle shared by the controller and its playback tasks.
#[derive(Clone)]
pub struct EgressHandle {
    tx: mpsc::Sender<EgressFrame>,
    active_utterance: Arc<AtomicU64>,
    next_utterance: Arc<AtomicU64>,
}

impl EgressHandle {
    pub fn new(tx: mpsc::Sender<EgressFrame>, active_utterance: Arc<AtomicU64>) -> Self {
        Self {
            tx,
            active_utterance,
            next_utterance: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocates a fresh utterance sequence and makes it the active one.
    pub fn begin_utterance(&self) -> u64 {
        let utterance = self.next_utterance.fetch_add(1, Ordering::Relaxed);
        self.active_utterance.store(utterance, Ordering::Release);
        utterance
    }

    /// Invalidates the current utterance: frames still in flight for it are
    /// dropped by the egress loop.
    pub fn discard_current(&self) {
        self.active_utterance.store(0, Ordering::Release);
    }

    pub fn sender(&self) -> mpsc::Sender<EgressFrame> {
        self.tx.clone()
    }
}

/// Runs the egress loop until producers drop, the sink fails, or the session
/// is cancelled.
///
/// A sink failure mid-chunk does not abort the loop: the remaining stream is
/// drained into a discard sink so producers never block on a dead peer, and
/// the outcome reports the closure.
pub async fn run_egress(
    mut sink: impl MediaSink,
    mut rx: mpsc::Receiver<EgressFrame>,
    stream_sid: Option<String>,
    active_utterance: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> EgressEnd {
    let mut sink_alive = true;
    let mut written: u64 = 0;
    let mut discarded: u64 = 0;

    let end = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break EgressEnd::Cancelled,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break if sink_alive { EgressEnd::Drained } else { EgressEnd::SinkClosed },
            },
        };

        if !sink_alive {
            discarded += 1;
            continue;
        }

        if frame.utterance != active_utterance.load(Ordering::Acquire) {
            discarded += 1;
            continue;
        }

        let media = MediaMessage::media(stream_sid.clone(), &frame.audio);
        if let Err(e) = sink.send(media).await {
            tracing::warn!(error = %e, "egress sink closed mid-chunk, draining to discard");
            sink_alive = false;
            discarded += 1;
            continue;
        }

        // Pacing marker after each chunk.
        let mark = MediaMessage::Mark {
            name: format!("tts-chunk-{}", uuid::Uuid::new_v4()),
        };
        if let Err(e) = sink.send(mark).await {
            tracing::warn!(error = %e, "egress sink closed on mark, draining to discard");
            sink_alive = false;
            continue;
        }

        written += 1;
    };

    tracing::debug!(written, discarded, end = ?end, "egress finished");
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::MediaSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<MediaMessage>>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl MediaSink for RecordingSink {
        async fn send(&mut self, message: MediaMessage) -> Result<(), crate::TransportError> {
            let mut frames = self.frames.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if frames.len() >= limit {
                    return Err(crate::TransportError::Closed);
                }
            }
            frames.push(message);
            Ok(())
        }
    }

    fn audio_frames(frames: &[MediaMessage]) -> Vec<Vec<u8>> {
        frames
            .iter()
            .filter_map(|f| f.decode_payload().ok().map(|b| b.to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn writes_media_with_marks_in_order() {
        let sink = RecordingSink::default();
        let frames = sink.frames.clone();
        let active = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel(8);
        let handle = EgressHandle::new(tx, active.clone());

        let utterance = handle.begin_utterance();
        let sender = handle.sender();
        sender
            .send(EgressFrame {
                utterance,
                audio: Bytes::from_static(&[1, 2]),
            })
            .await
            .unwrap();
        sender
            .send(EgressFrame {
                utterance,
                audio: Bytes::from_static(&[3, 4]),
            })
            .await
            .unwrap();
        drop(sender);
        drop(handle);

        let end = run_egress(sink, rx, None, active, CancellationToken::new()).await;
        assert_eq!(end, EgressEnd::Drained);

        let frames = frames.lock().unwrap();
        // media, mark, media, mark
        assert_eq!(frames.len(), 4);
        assert!(matches!(frames[1], MediaMessage::Mark { .. }));
        assert_eq!(audio_frames(&frames), vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn drops_frames_from_superseded_utterance() {
        let sink = RecordingSink::default();
        let frames = sink.frames.clone();
        let active = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel(8);
        let handle = EgressHandle::new(tx, active.clone());

        let stale = handle.begin_utterance();
        let sender = handle.sender();
        sender
            .send(EgressFrame {
                utterance: stale,
                audio: Bytes::from_static(&[9, 9]),
            })
            .await
            .unwrap();

        // Barge-in: the stale chunk above must never reach the peer.
        handle.discard_current();
        let fresh = handle.begin_utterance();
        sender
            .send(EgressFrame {
                utterance: fresh,
                audio: Bytes::from_static(&[7]),
            })
            .await
            .unwrap();
        drop(sender);
        drop(handle);

        let end = run_egress(sink, rx, None, active, CancellationToken::new()).await;
        assert_eq!(end, EgressEnd::Drained);
        assert_eq!(audio_frames(&frames.lock().unwrap()), vec![vec![7]]);
    }

    #[tokio::test]
    async fn sink_failure_drains_remaining_frames() {
        let sink = RecordingSink {
            frames: Arc::default(),
            fail_after: Some(0),
        };
        let frames = sink.frames.clone();
        let active = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel(8);
        let handle = EgressHandle::new(tx, active.clone());

        let utterance = handle.begin_utterance();
        let sender = handle.sender();
        for _ in 0..3 {
            sender
                .send(EgressFrame {
                    utterance,
                    audio: Bytes::from_static(&[0]),
                })
                .await
                .unwrap();
        }
        drop(sender);
        drop(handle);

        let end = run_egress(sink, rx, None, active, CancellationToken::new()).await;
        assert_eq!(end, EgressEnd::SinkClosed);
        assert!(frames.lock().unwrap().is_empty());
    }
}
