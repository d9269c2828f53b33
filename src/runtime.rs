use std::sync::Arc;

use crate::aggregates::AggregateRootRepository;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::sequence::CachingSequenceNumberGenerator;
use crate::store::EventStore;
use crate::unit_of_work::UnitOfWork;
use crate::views::{ViewDispatcher, ViewManager};

/// Wires the shared components around one event store and mints a fresh
/// [`UnitOfWork`] per logical operation.
///
/// The store, repository, and view dispatcher are shared across all units
/// of work; each unit of work gets its own sequence-number cache so that
/// concurrent operations stamp from true committed state and conflicts
/// surface at append time instead of being masked by shared allocation.
pub struct EsRuntime {
    store: Arc<dyn EventStore>,
    repository: Arc<AggregateRootRepository>,
    views: Arc<ViewDispatcher>,
    clock: Arc<dyn Clock>,
}

impl EsRuntime {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        let repository = Arc::new(AggregateRootRepository::new(store.clone()));
        Self {
            store,
            repository,
            views: Arc::new(ViewDispatcher::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Substitutes the clock used to stamp commit timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a view manager. Views added after events have been
    /// committed need [`initialize_views`](Self::initialize_views) to
    /// catch up on history.
    pub fn add_view_manager(&self, manager: Arc<dyn ViewManager>) {
        self.views.add_view_manager(manager);
    }

    /// Rebuilds every registered view from the full history. Returns the
    /// per-view failures, which do not affect the store.
    pub async fn initialize_views(&self, purge_existing: bool) -> Result<Vec<Error>> {
        self.views
            .initialize(self.store.as_ref(), purge_existing)
            .await
    }

    /// Begins a unit of work for one logical operation.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new(
            self.repository.clone(),
            Arc::new(CachingSequenceNumberGenerator::new(self.store.clone())),
            self.store.clone(),
            self.views.clone(),
            self.clock.clone(),
        )
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    pub fn repository(&self) -> Arc<AggregateRootRepository> {
        self.repository.clone()
    }
}
