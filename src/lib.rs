//! Event-sourcing runtime for CQRS applications.
//!
//! Business state is persisted exclusively as an ordered, append-only log
//! of immutable domain events; in-memory aggregate state is reconstructed
//! by replaying that log, and committed events fan out to derived read
//! models in commit order. An aggregate's observable state is a pure
//! function of its committed event sequence.
//!
//! The moving parts, leaves first:
//!
//! - [`EventStore`] — the append-only log; authority for per-aggregate and
//!   global ordering, with [`InMemoryEventStore`] as reference backend.
//! - [`CachingSequenceNumberGenerator`] — per-aggregate next-number supply
//!   during commit stamping.
//! - [`AggregateRootRepository`] — replay-based hydration with a by-value
//!   snapshot cache and point-in-time (cutoff) reads.
//! - [`UnitOfWork`] — per-operation staging and the atomic commit boundary.
//! - [`ViewDispatcher`] — ordered, replay-capable projection fan-out.
//!
//! [`EsRuntime`] wires these together; [`testing::TestContext`] packs the
//! whole stack into a deterministic harness for application tests.

mod aggregates;
mod clock;
mod error;
mod events;
mod runtime;
mod sequence;
mod store;
pub mod testing;
mod unit_of_work;
mod views;

pub use aggregates::{AggregateInstance, AggregateRoot, AggregateRootRepository};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use events::{metadata_keys, EventRecord, Metadata};
pub use runtime::EsRuntime;
pub use sequence::{CachingSequenceNumberGenerator, SequenceNumberGenerator};
pub use store::{EventStore, EventStream, InMemoryEventStore, LATEST_CUTOFF};
pub use unit_of_work::{Committed, UnitOfWork};
pub use views::{ViewDispatcher, ViewError, ViewManager};
