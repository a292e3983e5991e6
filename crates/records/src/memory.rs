//! In-memory call log for tests and local development.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use voxline_core::{CallLog, CallRecord, Result, TranscriptSegment};

use crate::StoredSegment;

/// Call log that keeps everything in memory.
#[derive(Default)]
pub struct MemoryCallLog {
    sequences: DashMap<String, u32>,
    calls: Mutex<Vec<CallRecord>>,
    segments: Mutex<Vec<StoredSegment>>,
}

impl MemoryCallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest upserted record for a call.
    pub fn call(&self, call_id: &str) -> Option<CallRecord> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|record| record.id == call_id)
            .cloned()
    }

    /// Segments for a call, in write order.
    pub fn segments(&self, call_id: &str) -> Vec<StoredSegment> {
        self.segments
            .lock()
            .iter()
            .filter(|stored| stored.segment.call_id == call_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CallLog for MemoryCallLog {
    async fn upsert_call(&self, record: &CallRecord) -> Result<()> {
        self.calls.lock().push(record.clone());
        Ok(())
    }

    async fn append_segment(&self, segment: TranscriptSegment) -> Result<()> {
        let mut entry = self
            .sequences
            .entry(segment.call_id.clone())
            .or_insert(0);
        *entry += 1;
        let sequence_number = *entry;
        drop(entry);
        self.segments.lock().push(StoredSegment {
            sequence_number,
            segment,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::Speaker;

    #[tokio::test]
    async fn assigns_sequences_per_call() {
        let log = MemoryCallLog::new();
        log.append_segment(TranscriptSegment::new("c1", Speaker::User, "hi"))
            .await
            .unwrap();
        log.append_segment(TranscriptSegment::new("c1", Speaker::Assistant, "hello"))
            .await
            .unwrap();

        let segments = log.segments("c1");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].sequence_number, 1);
        assert_eq!(segments[1].sequence_number, 2);
    }
}
