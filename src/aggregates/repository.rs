use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::aggregates::{AggregateInstance, AggregateRoot};
use crate::error::{Error, Result};
use crate::store::EventStore;

/// Type-erased snapshot arena keyed by `(TypeId, aggregate root id)`.
/// `Box<dyn Any>` lets one map hold `AggregateInstance<A>` for any
/// concrete `A`; downcasting recovers the typed snapshot.
type SnapshotCache = HashMap<(TypeId, Uuid), Box<dyn Any + Send + Sync>>;

// ============================================================================
// Aggregate Root Repository
// ============================================================================
//
// Materializes aggregate state by replaying the aggregate's event slice
// from the store, and amortizes repeated replay with a by-value snapshot
// cache. Entries are reused only after an explicit cutoff comparison plus
// a catch-up read, so a stale snapshot can cost an extra read but can
// never surface stale state.
//
// ============================================================================

pub struct AggregateRootRepository {
    store: Arc<dyn EventStore>,
    cache: Mutex<SnapshotCache>,
}

impl AggregateRootRepository {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loads an aggregate as of `global_cutoff`.
    ///
    /// A cached snapshot whose cutoff is at or below the requested cutoff
    /// is cloned and caught up from its recorded length; when no newer
    /// events exist in range it is returned unchanged. A snapshot hydrated
    /// beyond the requested cutoff cannot serve a point-in-time read, so
    /// such reads replay from scratch and leave the cache alone.
    ///
    /// With zero events in range the result is
    /// [`Error::AggregateRootNotFound`] unless `create_if_missing`, which
    /// yields a fresh empty instance at sequence 0.
    pub async fn get<A: AggregateRoot>(
        &self,
        aggregate_root_id: Uuid,
        global_cutoff: u64,
        create_if_missing: bool,
    ) -> Result<AggregateInstance<A>> {
        let key = (TypeId::of::<A>(), aggregate_root_id);

        let (mut instance, cacheable) = {
            let cache = self.cache.lock();
            match cache
                .get(&key)
                .and_then(|entry| entry.downcast_ref::<AggregateInstance<A>>())
            {
                Some(entry) if entry.global_cutoff <= global_cutoff => (entry.clone(), true),
                Some(_) => (AggregateInstance::fresh(aggregate_root_id), false),
                None => (AggregateInstance::fresh(aggregate_root_id), true),
            }
        };

        let mut stream = self.store.load_stream(
            aggregate_root_id,
            instance.sequence_number,
            global_cutoff,
        );
        while let Some(record) = stream.next().await {
            instance.apply_committed(&record?)?;
        }

        if instance.sequence_number == 0 && !create_if_missing {
            return Err(Error::AggregateRootNotFound { aggregate_root_id });
        }

        if cacheable {
            self.cache.lock().insert(key, Box::new(instance.clone()));
        }

        tracing::debug!(
            %aggregate_root_id,
            owner = A::OWNER,
            sequence_number = instance.sequence_number,
            global_cutoff = instance.global_cutoff,
            "hydrated aggregate root"
        );

        Ok(instance)
    }

    /// True iff the identity has at least one event at or below the
    /// cutoff. Peeks the stream's first element; never replays.
    pub async fn exists(&self, aggregate_root_id: Uuid, global_cutoff: u64) -> Result<bool> {
        let mut stream = self.store.load_stream(aggregate_root_id, 0, global_cutoff);
        match stream.next().await {
            Some(record) => {
                record?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops every cached snapshot for the identity, across aggregate
    /// types. The next `get` replays from the store.
    pub fn invalidate(&self, aggregate_root_id: Uuid) {
        self.cache
            .lock()
            .retain(|(_, cached_id), _| *cached_id != aggregate_root_id);
    }
}
