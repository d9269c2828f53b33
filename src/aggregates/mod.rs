use uuid::Uuid;

use crate::error::Result;
use crate::events::EventRecord;

mod repository;

pub use repository::AggregateRootRepository;

// ============================================================================
// Aggregate Roots
// ============================================================================
//
// An aggregate root is a mutable in-memory projection of one event stream.
// Its state is a pure function of the ordered prefix of that stream; the
// only mutation path is `apply`.
//
// ============================================================================

/// The apply capability an event-sourced aggregate type exposes.
///
/// `apply` dispatches on the record's event type tag. An aggregate must
/// handle every event type it can ever be asked to apply; the match's
/// catch-all arm returns
/// [`Error::UnhandledEventType`](crate::Error::UnhandledEventType), which
/// the repository treats as fatal.
///
/// ```
/// use eventline::{AggregateRoot, EventRecord, Error};
///
/// #[derive(Debug, Clone, Default)]
/// struct Counter {
///     count: i64,
/// }
///
/// impl AggregateRoot for Counter {
///     const OWNER: &'static str = "Counter";
///
///     fn apply(&mut self, event: &EventRecord) -> Result<(), Error> {
///         match event.event_type.as_str() {
///             "Incremented" => self.count += 1,
///             other => {
///                 return Err(Error::UnhandledEventType {
///                     owner: Self::OWNER.to_string(),
///                     event_type: other.to_string(),
///                 })
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait AggregateRoot: Default + Clone + Send + Sync + 'static {
    /// Owner tag stamped into every event this aggregate type emits.
    const OWNER: &'static str;

    fn apply(&mut self, event: &EventRecord) -> Result<()>;
}

/// An aggregate root snapshot plus the bookkeeping that makes it reusable:
/// its identity, how many events it has applied, and the global sequence
/// number up to which it has replayed. Instances move by value; reuse is
/// an explicit cutoff comparison, never shared aliasing.
#[derive(Debug, Clone)]
pub struct AggregateInstance<A> {
    pub aggregate_root_id: Uuid,
    pub root: A,
    /// Count of applied events, which is also the next expected
    /// per-aggregate sequence number.
    pub sequence_number: u64,
    /// Global sequence number up to and including which this instance has
    /// replayed. An entry whose cutoff trails the log tip is stale and
    /// must be caught up before reuse.
    pub global_cutoff: u64,
    /// How many staged (uncommitted) records this instance has applied on
    /// top of its committed prefix. The unit of work uses this to skip
    /// records already folded in when it re-derives from a registered
    /// instance.
    pub(crate) staged_applied: usize,
}

impl<A: AggregateRoot> AggregateInstance<A> {
    /// A fresh, empty instance at sequence 0.
    pub fn fresh(aggregate_root_id: Uuid) -> Self {
        Self {
            aggregate_root_id,
            root: A::default(),
            sequence_number: 0,
            global_cutoff: 0,
            staged_applied: 0,
        }
    }

    /// Applies one committed record and advances the bookkeeping from its
    /// stamped sequence numbers.
    pub fn apply_committed(&mut self, record: &EventRecord) -> Result<()> {
        self.root.apply(record)?;
        self.sequence_number = record.meta.sequence_number()? + 1;
        self.global_cutoff = record.meta.global_sequence_number()?;
        self.staged_applied = 0;
        Ok(())
    }

    /// Applies a staged record that has no sequence numbers yet. Used by
    /// the unit of work to derive in-progress state speculatively.
    pub(crate) fn apply_staged(&mut self, record: &EventRecord) -> Result<()> {
        self.root.apply(record)?;
        self.sequence_number += 1;
        self.staged_applied += 1;
        Ok(())
    }
}
