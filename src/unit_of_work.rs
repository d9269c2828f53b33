use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::aggregates::{AggregateInstance, AggregateRoot, AggregateRootRepository};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{metadata_keys, EventRecord};
use crate::sequence::SequenceNumberGenerator;
use crate::store::EventStore;
use crate::views::ViewDispatcher;

/// A staged, not-yet-committed emission attributed to the aggregate that
/// produced it. Sequence numbers are stamped at commit time, never here.
#[derive(Debug, Clone)]
struct StagedEvent {
    owner: &'static str,
    aggregate_root_id: Uuid,
    record: EventRecord,
}

/// The result of a successful commit: the finalized records as persisted,
/// plus any view-manager failures. View failures never roll back the
/// commit; they are surfaced here and logged.
#[derive(Debug, Default)]
pub struct Committed {
    pub events: Vec<EventRecord>,
    pub view_errors: Vec<Error>,
}

// ============================================================================
// Unit of Work
// ============================================================================
//
// The per-operation scope: stage emissions, serve reads that observe the
// operation's own uncommitted mutations, and commit the staged batch as
// one atomic append. One unit of work belongs to one logical operation;
// the `&mut self` API keeps it out of concurrent hands.
//
// ============================================================================

pub struct UnitOfWork {
    repository: Arc<AggregateRootRepository>,
    sequence_numbers: Arc<dyn SequenceNumberGenerator>,
    store: Arc<dyn EventStore>,
    views: Arc<ViewDispatcher>,
    clock: Arc<dyn Clock>,
    staged: Vec<StagedEvent>,
    cache: HashMap<(TypeId, Uuid), Box<dyn Any + Send + Sync>>,
}

impl UnitOfWork {
    pub fn new(
        repository: Arc<AggregateRootRepository>,
        sequence_numbers: Arc<dyn SequenceNumberGenerator>,
        store: Arc<dyn EventStore>,
        views: Arc<ViewDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            sequence_numbers,
            store,
            views,
            clock,
            staged: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// Stages an event emitted by the aggregate `A` with the given
    /// identity. The record keeps whatever metadata it already carries
    /// (a pre-set schema version survives); ownership, identity, sequence
    /// numbers, and timestamps are stamped during commit.
    pub fn emit<A: AggregateRoot>(&mut self, aggregate_root_id: Uuid, record: EventRecord) {
        tracing::debug!(
            owner = A::OWNER,
            %aggregate_root_id,
            event_type = %record.event_type,
            "staged event"
        );
        self.staged.push(StagedEvent {
            owner: A::OWNER,
            aggregate_root_id,
            record,
        });
    }

    /// The staged, not-yet-committed records in emission order.
    pub fn staged_events(&self) -> impl Iterator<Item = &EventRecord> {
        self.staged.iter().map(|staged| &staged.record)
    }

    /// Registers an aggregate instance in the per-operation cache so later
    /// fetches reuse it instead of replaying. An instance returned from
    /// [`get`](Self::get) may be re-registered: it remembers how many
    /// staged records it already carries, so a later fetch does not apply
    /// them a second time.
    pub fn add_to_cache<A: AggregateRoot>(&mut self, instance: AggregateInstance<A>) {
        self.cache.insert(
            (TypeId::of::<A>(), instance.aggregate_root_id),
            Box::new(instance),
        );
    }

    /// Fetches an aggregate as of `global_cutoff`, observing this
    /// operation's own staged events: the committed snapshot (cached or
    /// replayed through the repository) is re-derived with the staged
    /// records for that identity applied on top, so an aggregate mutated
    /// earlier in the operation reflects those mutations on a later fetch.
    ///
    /// An identity with staged events but no committed history counts as
    /// existing, so fetch-after-create works before the first commit
    /// regardless of the `create_if_missing` flag.
    pub async fn get<A: AggregateRoot>(
        &mut self,
        aggregate_root_id: Uuid,
        global_cutoff: u64,
        create_if_missing: bool,
    ) -> Result<AggregateInstance<A>> {
        let has_staged = self.has_staged(A::OWNER, aggregate_root_id);
        let key = (TypeId::of::<A>(), aggregate_root_id);

        let cached = self
            .cache
            .get(&key)
            .and_then(|entry| entry.downcast_ref::<AggregateInstance<A>>())
            .cloned();

        let base = match cached {
            Some(entry) if entry.global_cutoff <= global_cutoff => entry,
            Some(_) => {
                // Point-in-time read below the cached snapshot; replay
                // without disturbing the cache.
                self.repository
                    .get::<A>(aggregate_root_id, global_cutoff, create_if_missing || has_staged)
                    .await?
            }
            None => {
                let instance = self
                    .repository
                    .get::<A>(aggregate_root_id, global_cutoff, create_if_missing || has_staged)
                    .await?;
                self.add_to_cache(instance.clone());
                instance
            }
        };

        let mut instance = base;
        // A cached instance may already carry a prefix of the staged
        // records for this identity; apply only the remainder.
        let mut skip = instance.staged_applied;
        for staged in &self.staged {
            if staged.owner == A::OWNER && staged.aggregate_root_id == aggregate_root_id {
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                instance.apply_staged(&staged.record)?;
            }
        }
        Ok(instance)
    }

    /// True iff the aggregate has committed events at or below the cutoff,
    /// or staged events within this operation.
    pub async fn exists<A: AggregateRoot>(
        &self,
        aggregate_root_id: Uuid,
        global_cutoff: u64,
    ) -> Result<bool> {
        if self.has_staged(A::OWNER, aggregate_root_id) {
            return Ok(true);
        }
        self.repository.exists(aggregate_root_id, global_cutoff).await
    }

    /// Commits the staged batch atomically: stamps every record's metadata
    /// (owner, identity, per-aggregate sequence number, schema version,
    /// UTC and local timestamps), appends the whole batch to the store,
    /// and on success dispatches the finalized records to the registered
    /// views. With nothing staged this is a no-op.
    ///
    /// Any append failure leaves the staged events in place, invalidates
    /// the sequence cache for every staged identity, and propagates the
    /// error unchanged. After a transient
    /// [`Error::StoreUnavailable`] the same unit of work may simply call
    /// `commit` again; the retry re-stamps from true committed state. A
    /// [`Error::ConcurrencyConflict`] instead means the operation was
    /// derived from stale state and must be re-derived in a new unit of
    /// work.
    pub async fn commit(&mut self) -> Result<Committed> {
        if self.staged.is_empty() {
            return Ok(Committed::default());
        }

        let mut batch = Vec::with_capacity(self.staged.len());
        for staged in &self.staged {
            let sequence_number = self
                .sequence_numbers
                .next_sequence_number(staged.aggregate_root_id)
                .await?;
            let now = self.clock.now();

            let mut record = staged.record.clone();
            let meta = &mut record.meta;
            meta.set(metadata_keys::OWNER, staged.owner);
            meta.set(
                metadata_keys::AGGREGATE_ROOT_ID,
                staged.aggregate_root_id.to_string(),
            );
            meta.set(metadata_keys::SEQUENCE_NUMBER, sequence_number.to_string());
            if !meta.contains(metadata_keys::VERSION) {
                meta.set(metadata_keys::VERSION, "1");
            }
            meta.set(metadata_keys::TIME_UTC, now.to_rfc3339());
            meta.set(
                metadata_keys::TIME_LOCAL,
                now.with_timezone(&chrono::Local).to_rfc3339(),
            );
            batch.push(record);
        }

        let batch_id = Uuid::new_v4();
        let events = match self.store.append(batch_id, batch).await {
            Ok(events) => events,
            Err(err) => {
                // The stamping pass above already advanced the generator;
                // whatever the failure, those numbers were never committed,
                // so a retry must re-read the store.
                for staged in &self.staged {
                    self.sequence_numbers.invalidate(staged.aggregate_root_id);
                }
                return Err(err);
            }
        };

        self.staged.clear();
        self.cache.clear();

        tracing::info!(%batch_id, event_count = events.len(), "committed unit of work");

        let view_errors = self.views.dispatch(&events).await;
        Ok(Committed { events, view_errors })
    }

    fn has_staged(&self, owner: &str, aggregate_root_id: Uuid) -> bool {
        self.staged
            .iter()
            .any(|staged| staged.owner == owner && staged.aggregate_root_id == aggregate_root_id)
    }
}
