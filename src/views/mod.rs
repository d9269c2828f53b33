use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::events::EventRecord;
use crate::store::EventStore;

// ============================================================================
// Views
// ============================================================================
//
// Views are derived read models fed by committed events. They are
// eventually consistent by design: a failing view never rolls back the
// commit that produced the batch, and a view can always be rebuilt from
// scratch by replaying the full history.
//
// ============================================================================

/// Failure raised by a view manager, naming the committed event (by global
/// sequence number) that caused it.
#[derive(Debug, thiserror::Error)]
#[error("failed at global sequence {global_sequence_number}: {source}")]
pub struct ViewError {
    pub global_sequence_number: u64,
    #[source]
    pub source: anyhow::Error,
}

impl ViewError {
    /// Wraps a failure observed while processing the given record.
    ///
    /// Dispatch only ever delivers finalized records, so the global
    /// sequence number must be present and well formed.
    pub fn at(record: &EventRecord, source: impl Into<anyhow::Error>) -> Self {
        let global_sequence_number = record.meta.global_sequence_number();
        debug_assert!(
            global_sequence_number.is_ok(),
            "view dispatch received a record without a global sequence number"
        );
        Self {
            global_sequence_number: global_sequence_number.unwrap_or(0),
            source: source.into(),
        }
    }
}

/// A sink for ordered batches of committed events.
///
/// Implementations update their own derived state and must be idempotent
/// under replay from the same starting point, since a rebuild re-delivers
/// the full history.
#[async_trait]
pub trait ViewManager: Send + Sync {
    /// Name used in dispatch-failure reporting and logs.
    fn name(&self) -> &str;

    /// Consumes one committed, globally-ordered batch.
    async fn dispatch(&self, events: &[EventRecord]) -> std::result::Result<(), ViewError>;

    /// Clears the view's storage ahead of a full rebuild. Optional;
    /// views without rebuild support keep the default.
    async fn purge(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered fan-out of committed batches to every registered view manager,
/// plus full-history replay for initialization and rebuilds.
///
/// Managers are invoked in registration order and every manager sees
/// events in the same commit order. Failures are isolated per manager:
/// they are reported and logged, and the remaining managers still run.
#[derive(Default)]
pub struct ViewDispatcher {
    managers: RwLock<Vec<Arc<dyn ViewManager>>>,
}

impl ViewDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_view_manager(&self, manager: Arc<dyn ViewManager>) {
        self.managers.write().push(manager);
    }

    /// Delivers an already-committed batch to every manager. Returns the
    /// per-manager failures; the committed store state is unaffected.
    pub async fn dispatch(&self, events: &[EventRecord]) -> Vec<Error> {
        let managers: Vec<Arc<dyn ViewManager>> = self.managers.read().clone();

        let mut failures = Vec::new();
        for manager in managers {
            if let Err(view_error) = manager.dispatch(events).await {
                tracing::error!(
                    view = manager.name(),
                    global_sequence_number = view_error.global_sequence_number,
                    error = %view_error.source,
                    "view manager failed to process committed batch"
                );
                failures.push(Error::ViewDispatch {
                    view: manager.name().to_string(),
                    global_sequence_number: view_error.global_sequence_number,
                    source: view_error.source,
                });
            }
        }
        failures
    }

    /// Rebuilds every registered view from the full event history, in
    /// commit order. With `purge_existing`, each view's storage is cleared
    /// first. Per-view failures are returned alongside success; a store
    /// read failure aborts the whole initialization.
    pub async fn initialize(
        &self,
        store: &dyn EventStore,
        purge_existing: bool,
    ) -> Result<Vec<Error>> {
        let mut failures = Vec::new();

        if purge_existing {
            let managers: Vec<Arc<dyn ViewManager>> = self.managers.read().clone();
            for manager in managers {
                if let Err(source) = manager.purge().await {
                    tracing::error!(view = manager.name(), error = %source, "view purge failed");
                    failures.push(Error::ViewPurge {
                        view: manager.name().to_string(),
                        source,
                    });
                }
            }
        }

        let mut history = Vec::new();
        let mut stream = store.stream_all(0);
        while let Some(record) = stream.next().await {
            history.push(record?);
        }

        tracing::info!(event_count = history.len(), "replaying history into views");
        failures.extend(self.dispatch(&history).await);
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{metadata_keys, EventRecord};
    use crate::store::InMemoryEventStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use uuid::Uuid;

    /// Records every delivered global sequence number, optionally failing
    /// when it reaches a configured one.
    struct RecordingView {
        name: String,
        seen: Mutex<Vec<u64>>,
        fail_at: Option<u64>,
    }

    impl RecordingView {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }

        fn failing_at(name: &str, global_sequence_number: u64) -> Self {
            Self {
                fail_at: Some(global_sequence_number),
                ..Self::new(name)
            }
        }
    }

    #[async_trait]
    impl ViewManager for RecordingView {
        fn name(&self) -> &str {
            &self.name
        }

        async fn dispatch(&self, events: &[EventRecord]) -> std::result::Result<(), ViewError> {
            for record in events {
                let global = record.meta.global_sequence_number().unwrap();
                if self.fail_at == Some(global) {
                    return Err(ViewError::at(record, anyhow::anyhow!("refusing event")));
                }
                self.seen.lock().push(global);
            }
            Ok(())
        }

        async fn purge(&self) -> anyhow::Result<()> {
            self.seen.lock().clear();
            Ok(())
        }
    }

    fn record(id: Uuid, sequence_number: u64) -> EventRecord {
        EventRecord::new("SomethingHappened", json!({}))
            .with_meta(metadata_keys::OWNER, "SomeAggregate")
            .with_meta(metadata_keys::AGGREGATE_ROOT_ID, id.to_string())
            .with_meta(metadata_keys::SEQUENCE_NUMBER, sequence_number.to_string())
    }

    async fn committed_batch(store: &InMemoryEventStore, count: u64) -> Vec<EventRecord> {
        let id = Uuid::new_v4();
        let batch = (0..count).map(|seq| record(id, seq)).collect();
        store.append(Uuid::new_v4(), batch).await.unwrap()
    }

    #[tokio::test]
    async fn test_all_managers_see_events_in_commit_order() {
        let store = InMemoryEventStore::new();
        let batch = committed_batch(&store, 3).await;

        let dispatcher = ViewDispatcher::new();
        let first = Arc::new(RecordingView::new("first"));
        let second = Arc::new(RecordingView::new("second"));
        dispatcher.add_view_manager(first.clone());
        dispatcher.add_view_manager(second.clone());

        let failures = dispatcher.dispatch(&batch).await;

        assert!(failures.is_empty());
        assert_eq!(*first.seen.lock(), vec![1, 2, 3]);
        assert_eq!(*second.seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_one_failing_manager_does_not_stop_the_others() {
        let store = InMemoryEventStore::new();
        let batch = committed_batch(&store, 5).await;

        let dispatcher = ViewDispatcher::new();
        let flaky = Arc::new(RecordingView::failing_at("flaky", 3));
        let steady = Arc::new(RecordingView::new("steady"));
        dispatcher.add_view_manager(flaky.clone());
        dispatcher.add_view_manager(steady.clone());

        let failures = dispatcher.dispatch(&batch).await;

        assert_eq!(failures.len(), 1);
        match &failures[0] {
            Error::ViewDispatch {
                view,
                global_sequence_number,
                ..
            } => {
                assert_eq!(view, "flaky");
                assert_eq!(*global_sequence_number, 3);
            }
            other => panic!("expected view dispatch failure, got {other:?}"),
        }
        assert_eq!(*steady.seen.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without a global sequence number")]
    fn test_view_error_rejects_unstamped_records() {
        let unstamped = EventRecord::new("SomethingHappened", json!({}));
        let _ = ViewError::at(&unstamped, anyhow::anyhow!("refusing event"));
    }

    #[tokio::test]
    async fn test_initialize_replays_history_exactly_once() {
        let store = InMemoryEventStore::new();
        committed_batch(&store, 2).await;
        committed_batch(&store, 1).await;

        let dispatcher = ViewDispatcher::new();
        let view = Arc::new(RecordingView::new("summary"));
        dispatcher.add_view_manager(view.clone());

        // Seed the view with stale entries; purge must clear them.
        view.seen.lock().extend([99, 98]);

        let failures = dispatcher.initialize(&store, true).await.unwrap();

        assert!(failures.is_empty());
        assert_eq!(*view.seen.lock(), vec![1, 2, 3]);
    }
}
