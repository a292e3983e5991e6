//! Buffered call log with bounded retry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use voxline_core::{CallLog, CallRecord, Result, TranscriptSegment};

use crate::{RecordsBackend, StoredSegment};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum PendingWrite {
    Call(CallRecord),
    Segment(StoredSegment),
}

/// Call log that assigns sequence numbers and retries failed writes.
///
/// Failed writes land in a bounded in-memory queue flushed by a background
/// task with exponential backoff; the oldest entries are dropped on
/// overflow. A failing backend therefore degrades durability, never call
/// continuity.
pub struct BufferedCallLog {
    backend: Arc<dyn RecordsBackend>,
    sequences: DashMap<String, u32>,
    queue: Arc<Mutex<VecDeque<PendingWrite>>>,
    queue_max: usize,
    wakeup: Arc<Notify>,
}

impl BufferedCallLog {
    pub fn new(backend: Arc<dyn RecordsBackend>, queue_max: usize) -> Arc<Self> {
        let log = Arc::new(Self {
            backend,
            sequences: DashMap::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            queue_max: queue_max.max(1),
            wakeup: Arc::new(Notify::new()),
        });
        tokio::spawn(Self::flush_loop(Arc::clone(&log)));
        log
    }

    /// Next sequence number for a call, starting at 1.
    fn next_sequence(&self, call_id: &str) -> u32 {
        let mut entry = self.sequences.entry(call_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn enqueue(&self, write: PendingWrite) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.queue_max {
            queue.pop_front();
            metrics::counter!("voxline_call_log_dropped_total").increment(1);
            tracing::warn!("call log retry queue full, dropped oldest entry");
        }
        queue.push_back(write);
        drop(queue);
        self.wakeup.notify_one();
    }

    async fn write(&self, write: &PendingWrite) -> Result<()> {
        match write {
            PendingWrite::Call(record) => self.backend.write_call(record).await,
            PendingWrite::Segment(segment) => self.backend.write_segment(segment).await,
        }
    }

    async fn flush_loop(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let next = self.queue.lock().front().cloned();
            let Some(write) = next else {
                self.wakeup.notified().await;
                continue;
            };

            match self.write(&write).await {
                Ok(()) => {
                    self.queue.lock().pop_front();
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64,
                        "call log retry failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[async_trait]
impl CallLog for BufferedCallLog {
    async fn upsert_call(&self, record: &CallRecord) -> Result<()> {
        if record.status.is_terminal() {
            self.sequences.remove(&record.id);
        }
        if let Err(e) = self.backend.write_call(record).await {
            tracing::warn!(call_id = %record.id, error = %e, "call upsert failed, queueing retry");
            self.enqueue(PendingWrite::Call(record.clone()));
        }
        Ok(())
    }

    async fn append_segment(&self, segment: TranscriptSegment) -> Result<()> {
        let stored = StoredSegment {
            sequence_number: self.next_sequence(&segment.call_id),
            segment,
        };
        if let Err(e) = self.backend.write_segment(&stored).await {
            tracing::warn!(call_id = %stored.segment.call_id, error = %e,
                "segment write failed, queueing retry");
            self.enqueue(PendingWrite::Segment(stored));
        }
        Ok(())
    }
}
