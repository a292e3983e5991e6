//! Management-storage reads and durable call logging
//!
//! Two concerns share one REST backend (a PostgREST-style API):
//! - reads of management records the core does not own: agents and
//!   phone-number routing
//! - append-only writes of call records and transcript segments
//!
//! Writes go through `BufferedCallLog`, which assigns per-call sequence
//! numbers and absorbs backend failures into a bounded retry queue with
//! exponential backoff. Log durability is best-effort relative to call
//! continuity: the queue drops its oldest entries on overflow and a dead
//! backend never fails a call.

mod buffered;
mod memory;
mod supabase;

pub use buffered::BufferedCallLog;
pub use memory::MemoryCallLog;
pub use supabase::SupabaseRecords;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use voxline_core::{CallRecord, Result, TranscriptSegment};

/// A transcript segment with its writer-assigned sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSegment {
    pub sequence_number: u32,
    #[serde(flatten)]
    pub segment: TranscriptSegment,
}

/// Raw write backend behind the buffered log.
#[async_trait]
pub trait RecordsBackend: Send + Sync + 'static {
    async fn write_call(&self, record: &CallRecord) -> Result<()>;
    async fn write_segment(&self, segment: &StoredSegment) -> Result<()>;
}
