use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;
use crate::events::EventRecord;

mod in_memory;

pub use in_memory::InMemoryEventStore;

/// Global cutoff meaning "the current tip of the log".
pub const LATEST_CUTOFF: u64 = u64::MAX;

/// Lazy, ordered, finite sequence of event records. Each call to a read
/// operation produces a fresh stream over a consistent snapshot, so
/// streams are restartable by calling the operation again.
pub type EventStream = BoxStream<'static, Result<EventRecord>>;

// ============================================================================
// Event Store
// ============================================================================
//
// The durable, append-only, strictly ordered log: the single source of
// truth and the authority for both per-aggregate and global ordering.
// Concrete backends implement this trait; the crate ships an in-memory
// reference implementation.
//
// ============================================================================

#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Atomically appends a non-empty batch of event records.
    ///
    /// Incoming records carry their intended per-aggregate sequence numbers
    /// but no global numbers yet. For every aggregate touched, the intended
    /// numbers must contiguously continue that aggregate's current length;
    /// any gap or duplicate fails the whole batch with
    /// [`Error::ConcurrencyConflict`](crate::Error::ConcurrencyConflict)
    /// and nothing becomes visible. On success, global sequence numbers are
    /// assigned in batch order and the finalized records are returned.
    async fn append(&self, batch_id: Uuid, events: Vec<EventRecord>) -> Result<Vec<EventRecord>>;

    /// Streams one aggregate's events, in per-aggregate sequence order,
    /// starting at `from_sequence_number` and limited to records whose
    /// global sequence number is at or below `global_cutoff`. Empty when
    /// the aggregate has no events in range.
    fn load_stream(
        &self,
        aggregate_root_id: Uuid,
        from_sequence_number: u64,
        global_cutoff: u64,
    ) -> EventStream;

    /// The aggregate's current event count, which is also its next
    /// expected per-aggregate sequence number.
    async fn current_length(&self, aggregate_root_id: Uuid) -> Result<u64>;

    /// Streams the full committed history across all aggregates in global
    /// order, starting at `from_global_sequence_number`.
    fn stream_all(&self, from_global_sequence_number: u64) -> EventStream;
}
