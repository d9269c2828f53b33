use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::store::EventStore;

/// Supplies the next per-aggregate sequence number during commit stamping.
///
/// Purely an optimization over asking the store every time: the store's
/// own contiguity check at append is the sole authority, so a generator
/// can never hand out a number the store will accept without revalidation.
/// After a detected concurrency conflict the cached state must be dropped
/// via `invalidate`.
#[async_trait]
pub trait SequenceNumberGenerator: Send + Sync {
    /// One past the highest committed (or, within one commit, previously
    /// handed-out) sequence number for the identity.
    async fn next_sequence_number(&self, aggregate_root_id: Uuid) -> Result<u64>;

    /// Drops any cached state for the identity.
    fn invalidate(&self, aggregate_root_id: Uuid);
}

/// Store-backed generator that caches the next number per identity and
/// advances it on every call, so several events staged against the same
/// aggregate in one commit receive contiguous numbers in emission order.
///
/// Scope one instance to one unit of work. Shared across concurrent
/// operations it would hand out allocation-style numbers and mask the
/// conflicts the store is supposed to detect.
pub struct CachingSequenceNumberGenerator {
    store: Arc<dyn EventStore>,
    next_by_root: Mutex<HashMap<Uuid, u64>>,
}

impl CachingSequenceNumberGenerator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            next_by_root: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SequenceNumberGenerator for CachingSequenceNumberGenerator {
    async fn next_sequence_number(&self, aggregate_root_id: Uuid) -> Result<u64> {
        if let Some(next) = self.next_by_root.lock().get_mut(&aggregate_root_id) {
            let number = *next;
            *next += 1;
            return Ok(number);
        }

        let length = self.store.current_length(aggregate_root_id).await?;

        let mut cache = self.next_by_root.lock();
        let next = cache.entry(aggregate_root_id).or_insert(length);
        let number = *next;
        *next += 1;
        Ok(number)
    }

    fn invalidate(&self, aggregate_root_id: Uuid) {
        self.next_by_root.lock().remove(&aggregate_root_id);
    }
}
