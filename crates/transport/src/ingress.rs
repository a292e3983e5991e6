//! Ingress: envelope frames in, raw PCM out.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::frame::MediaMessage;
use crate::ws::MediaSource;

/// How the ingress loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressEnd {
    /// The peer sent `stop`.
    PeerStopped,
    /// The peer reported an error frame.
    PeerError(String),
    /// The transport closed or failed without a `stop`.
    TransportClosed,
    /// The session was cancelled locally.
    Cancelled,
}

/// Runs the ingress loop until the peer or the session ends it.
///
/// Decoded PCM goes onto `audio_tx`, a bounded channel: when the recognizer
/// stalls, the send blocks and the peer is backpressured through TCP. The
/// channel closes (by dropping the sender) on any exit, which tells the
/// recognizer to flush trailing finals.
pub async fn run_ingress(
    mut source: impl MediaSource,
    audio_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> IngressEnd {
    let mut frames: u64 = 0;

    let end = loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break IngressEnd::Cancelled,
            message = source.next_message() => message,
        };

        match message {
            Ok(Some(frame @ MediaMessage::Media { .. })) => {
                let frame = match frame.decode_payload() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping media frame with bad payload");
                        continue;
                    }
                };
                frames += 1;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break IngressEnd::Cancelled,
                    sent = audio_tx.send(frame) => {
                        if sent.is_err() {
                            // Receiver gone: the recognizer side is shutting
                            // down; nothing more to forward.
                            break IngressEnd::Cancelled;
                        }
                    }
                }
            }
            Ok(Some(MediaMessage::Stop)) => break IngressEnd::PeerStopped,
            Ok(Some(MediaMessage::Error { message })) => break IngressEnd::PeerError(message),
            Ok(Some(MediaMessage::Mark { name })) => {
                tracing::trace!(mark = %name, "peer mark");
            }
            Ok(Some(MediaMessage::Connect { .. })) => {
                tracing::debug!("peer re-sent connect frame");
            }
            Ok(None) => break IngressEnd::TransportClosed,
            Err(e) => {
                tracing::warn!(error = %e, "ingress transport error");
                break IngressEnd::TransportClosed;
            }
        }
    };

    tracing::debug!(frames, end = ?end, "ingress finished");
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ScriptedSource {
        messages: VecDeque<MediaMessage>,
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        async fn next_message(&mut self) -> Result<Option<MediaMessage>, crate::TransportError> {
            Ok(self.messages.pop_front())
        }
    }

    #[tokio::test]
    async fn forwards_media_and_stops_on_stop() {
        let source = ScriptedSource {
            messages: VecDeque::from(vec![
                MediaMessage::media(None, &[1, 2, 3]),
                MediaMessage::Mark {
                    name: "m1".to_string(),
                },
                MediaMessage::media(None, &[4, 5]),
                MediaMessage::Stop,
            ]),
        };
        let (tx, mut rx) = mpsc::channel(8);

        let end = run_ingress(source, tx, CancellationToken::new()).await;
        assert_eq!(end, IngressEnd::PeerStopped);

        assert_eq!(rx.recv().await.unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(rx.recv().await.unwrap().as_ref(), &[4, 5]);
        // Sender dropped on exit closes the audio channel.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn transport_eof_reports_closed() {
        let source = ScriptedSource {
            messages: VecDeque::new(),
        };
        let (tx, _rx) = mpsc::channel(1);
        let end = run_ingress(source, tx, CancellationToken::new()).await;
        assert_eq!(end, IngressEnd::TransportClosed);
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_reads() {
        struct PendingSource;

        #[async_trait]
        impl MediaSource for PendingSource {
            async fn next_message(
                &mut self,
            ) -> Result<Option<MediaMessage>, crate::TransportError> {
                std::future::pending().await
            }
        }

        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let end = run_ingress(PendingSource, tx, cancel).await;
        assert_eq!(end, IngressEnd::Cancelled);
    }
}
