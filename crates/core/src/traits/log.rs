//! Call log seam.

use async_trait::async_trait;

use crate::call::{CallRecord, TranscriptSegment};
use crate::error::Result;

/// Durable, append-only call logging.
///
/// Failures are absorbed by the implementation (bounded retry queue with
/// backoff); they are never allowed to fail the call. Durability is
/// best-effort relative to call continuity.
#[async_trait]
pub trait CallLog: Send + Sync + 'static {
    /// Idempotent upsert keyed on the call id.
    async fn upsert_call(&self, record: &CallRecord) -> Result<()>;

    /// Appends one transcript segment. The writer assigns the per-call
    /// monotonic sequence number.
    async fn append_segment(&self, segment: TranscriptSegment) -> Result<()>;
}
