//! Harness for testing CQRS+ES application code against a real, in-memory
//! runtime: deterministic clock, full commit/dispatch path, and direct
//! access to the committed history.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::aggregates::{AggregateInstance, AggregateRoot};
use crate::clock::FixedClock;
use crate::error::Result;
use crate::events::EventRecord;
use crate::runtime::EsRuntime;
use crate::store::{EventStore, InMemoryEventStore, LATEST_CUTOFF};
use crate::unit_of_work::{Committed, UnitOfWork};
use crate::views::ViewManager;

/// In-memory test harness around the full runtime.
///
/// Holds one open [`UnitOfWork`] at a time; `commit` flushes it through
/// the real append-and-dispatch path and opens the next one. Views are
/// initialized (with purge) before the first commit.
pub struct TestContext {
    runtime: EsRuntime,
    store: Arc<InMemoryEventStore>,
    clock: Arc<FixedClock>,
    unit_of_work: UnitOfWork,
    initialized: bool,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
        ));
        let runtime =
            EsRuntime::new(store.clone() as Arc<dyn EventStore>).with_clock(clock.clone());
        let unit_of_work = runtime.begin();
        Self {
            runtime,
            store,
            clock,
            unit_of_work,
            initialized: false,
        }
    }

    pub fn add_view_manager(&self, manager: Arc<dyn ViewManager>) {
        self.runtime.add_view_manager(manager);
    }

    /// Freezes the clock at the given instant; every subsequent stamp
    /// advances it by one microsecond.
    pub fn set_current_time(&self, time: DateTime<Utc>) {
        self.clock.set(time);
    }

    /// Fetches (or creates) an aggregate at the current log tip through
    /// the open unit of work, observing staged events.
    pub async fn get<A: AggregateRoot>(
        &mut self,
        aggregate_root_id: Uuid,
        create_if_missing: bool,
    ) -> Result<AggregateInstance<A>> {
        self.unit_of_work
            .get::<A>(aggregate_root_id, LATEST_CUTOFF, create_if_missing)
            .await
    }

    /// Stages an event in the open unit of work.
    pub fn emit<A: AggregateRoot>(&mut self, aggregate_root_id: Uuid, record: EventRecord) {
        self.unit_of_work.emit::<A>(aggregate_root_id, record);
    }

    /// Stages and immediately commits a single event, as if emitted by
    /// the given aggregate.
    pub async fn save<A: AggregateRoot>(
        &mut self,
        aggregate_root_id: Uuid,
        record: EventRecord,
    ) -> Result<Committed> {
        self.emit::<A>(aggregate_root_id, record);
        self.commit().await
    }

    /// Commits the open unit of work through the real append path, then
    /// opens a fresh one. Emitted events become part of the history and
    /// hydrate aggregate roots from now on.
    pub async fn commit(&mut self) -> Result<Committed> {
        self.ensure_initialized().await?;
        let committed = self.unit_of_work.commit().await?;
        self.unit_of_work = self.runtime.begin();
        Ok(committed)
    }

    /// The staged, uncommitted records in the open unit of work.
    pub fn staged_events(&self) -> Vec<EventRecord> {
        self.unit_of_work.staged_events().cloned().collect()
    }

    /// The entire committed history, in commit order.
    pub async fn history(&self) -> Result<Vec<EventRecord>> {
        let mut history = Vec::new();
        let mut stream = self.store.stream_all(0);
        while let Some(record) = stream.next().await {
            history.push(record?);
        }
        Ok(history)
    }

    pub fn runtime(&self) -> &EsRuntime {
        &self.runtime
    }

    async fn ensure_initialized(&mut self) -> Result<()> {
        if !self.initialized {
            self.runtime.initialize_views(true).await?;
            self.initialized = true;
        }
        Ok(())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
