use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{metadata_keys, EventRecord};
use crate::store::{EventStore, EventStream};

/// One committed record plus the typed ordering fields extracted at append
/// time, so reads never re-parse metadata.
#[derive(Debug, Clone)]
struct StoredRecord {
    aggregate_root_id: Uuid,
    sequence_number: u64,
    global_sequence_number: u64,
    record: EventRecord,
}

#[derive(Debug, Default)]
struct Inner {
    /// Full log in global order. Global numbers are one-based, so the
    /// record at index `i` has global sequence number `i + 1`.
    log: Vec<StoredRecord>,
    /// Per-aggregate event counts, kept in step with the log.
    lengths: HashMap<Uuid, u64>,
}

/// In-memory [`EventStore`] used as the reference backend and by the test
/// context. Appends run entirely inside the write lock, which is the
/// single critical section spanning the contiguity check, global-number
/// assignment, and the write itself; readers snapshot under the read lock
/// and therefore never observe a partially-appended batch.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, batch_id: Uuid, events: Vec<EventRecord>) -> Result<Vec<EventRecord>> {
        if events.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut inner = self.inner.write();

        // Validate the whole batch before touching any state, so a
        // conflict anywhere leaves nothing partially visible.
        let mut expected: HashMap<Uuid, u64> = HashMap::new();
        let mut typed = Vec::with_capacity(events.len());
        for record in &events {
            let aggregate_root_id = record.meta.aggregate_root_id()?;
            let sequence_number = record.meta.sequence_number()?;
            let next = expected
                .entry(aggregate_root_id)
                .or_insert_with(|| inner.lengths.get(&aggregate_root_id).copied().unwrap_or(0));
            if sequence_number != *next {
                return Err(Error::ConcurrencyConflict {
                    aggregate_root_id,
                    assumed_sequence_number: sequence_number,
                    current_sequence_number: *next,
                });
            }
            *next += 1;
            typed.push((aggregate_root_id, sequence_number));
        }

        let first_global = inner.log.len() as u64 + 1;
        let mut finalized = Vec::with_capacity(events.len());
        for (mut record, (aggregate_root_id, sequence_number)) in
            events.into_iter().zip(typed)
        {
            let global_sequence_number = inner.log.len() as u64 + 1;
            record.meta.set(
                metadata_keys::GLOBAL_SEQUENCE_NUMBER,
                global_sequence_number.to_string(),
            );
            inner.log.push(StoredRecord {
                aggregate_root_id,
                sequence_number,
                global_sequence_number,
                record: record.clone(),
            });
            *inner.lengths.entry(aggregate_root_id).or_insert(0) += 1;
            finalized.push(record);
        }

        tracing::info!(
            %batch_id,
            event_count = finalized.len(),
            first_global_sequence_number = first_global,
            "appended event batch"
        );

        Ok(finalized)
    }

    fn load_stream(
        &self,
        aggregate_root_id: Uuid,
        from_sequence_number: u64,
        global_cutoff: u64,
    ) -> EventStream {
        let snapshot: Vec<EventRecord> = self
            .inner
            .read()
            .log
            .iter()
            .filter(|stored| {
                stored.aggregate_root_id == aggregate_root_id
                    && stored.sequence_number >= from_sequence_number
                    && stored.global_sequence_number <= global_cutoff
            })
            .map(|stored| stored.record.clone())
            .collect();

        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }

    async fn current_length(&self, aggregate_root_id: Uuid) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .lengths
            .get(&aggregate_root_id)
            .copied()
            .unwrap_or(0))
    }

    fn stream_all(&self, from_global_sequence_number: u64) -> EventStream {
        let snapshot: Vec<EventRecord> = self
            .inner
            .read()
            .log
            .iter()
            .filter(|stored| stored.global_sequence_number >= from_global_sequence_number)
            .map(|stored| stored.record.clone())
            .collect();

        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LATEST_CUTOFF;
    use serde_json::json;

    fn record(aggregate_root_id: Uuid, sequence_number: u64) -> EventRecord {
        EventRecord::new("SomethingHappened", json!({ "seq": sequence_number }))
            .with_meta(metadata_keys::OWNER, "SomeAggregate")
            .with_meta(metadata_keys::AGGREGATE_ROOT_ID, aggregate_root_id.to_string())
            .with_meta(metadata_keys::SEQUENCE_NUMBER, sequence_number.to_string())
    }

    async fn collect(mut stream: EventStream) -> Vec<EventRecord> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_global_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        let first = store
            .append(Uuid::new_v4(), vec![record(x, 0), record(x, 1)])
            .await
            .unwrap();
        let second = store
            .append(Uuid::new_v4(), vec![record(y, 0)])
            .await
            .unwrap();

        assert_eq!(first[0].meta.global_sequence_number().unwrap(), 1);
        assert_eq!(first[1].meta.global_sequence_number().unwrap(), 2);
        assert_eq!(second[0].meta.global_sequence_number().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gap_in_batch_is_a_concurrency_conflict() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();

        let err = store
            .append(Uuid::new_v4(), vec![record(x, 1)])
            .await
            .unwrap_err();

        match err {
            Error::ConcurrencyConflict {
                aggregate_root_id,
                assumed_sequence_number,
                current_sequence_number,
            } => {
                assert_eq!(aggregate_root_id, x);
                assert_eq!(assumed_sequence_number, 1);
                assert_eq!(current_sequence_number, 0);
            }
            other => panic!("expected concurrency conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_conflicting_batch_leaves_no_partial_state() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        store
            .append(Uuid::new_v4(), vec![record(x, 0)])
            .await
            .unwrap();

        // y's record is fine but x's stale number sinks the whole batch.
        let err = store
            .append(Uuid::new_v4(), vec![record(y, 0), record(x, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict { .. }));

        assert_eq!(store.current_length(x).await.unwrap(), 1);
        assert_eq!(store.current_length(y).await.unwrap(), 0);
        assert_eq!(collect(store.stream_all(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_inside_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();

        let err = store
            .append(Uuid::new_v4(), vec![record(x, 0), record(x, 0)])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConcurrencyConflict { .. }));
        assert_eq!(store.current_length(x).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let err = store.append(Uuid::new_v4(), vec![]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
    }

    #[tokio::test]
    async fn test_load_stream_respects_range_and_cutoff() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        store
            .append(Uuid::new_v4(), vec![record(x, 0), record(x, 1)])
            .await
            .unwrap();
        store
            .append(Uuid::new_v4(), vec![record(y, 0)])
            .await
            .unwrap();
        store
            .append(Uuid::new_v4(), vec![record(x, 2)])
            .await
            .unwrap();

        let full = collect(store.load_stream(x, 0, LATEST_CUTOFF)).await;
        assert_eq!(full.len(), 3);

        // Cutoff 2 hides x's third event (global 4).
        let historical = collect(store.load_stream(x, 0, 2)).await;
        assert_eq!(historical.len(), 2);
        assert_eq!(historical[1].meta.sequence_number().unwrap(), 1);

        let tail = collect(store.load_stream(x, 2, LATEST_CUTOFF)).await;
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].meta.sequence_number().unwrap(), 2);

        assert!(collect(store.load_stream(Uuid::new_v4(), 0, LATEST_CUTOFF))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_streams_are_restartable() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();
        store
            .append(Uuid::new_v4(), vec![record(x, 0)])
            .await
            .unwrap();

        let first = collect(store.load_stream(x, 0, LATEST_CUTOFF)).await;
        let second = collect(store.load_stream(x, 0, LATEST_CUTOFF)).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stream_all_preserves_commit_order() {
        let store = InMemoryEventStore::new();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        store
            .append(Uuid::new_v4(), vec![record(x, 0)])
            .await
            .unwrap();
        store
            .append(Uuid::new_v4(), vec![record(y, 0), record(x, 1)])
            .await
            .unwrap();

        let all = collect(store.stream_all(1)).await;
        let globals: Vec<u64> = all
            .iter()
            .map(|r| r.meta.global_sequence_number().unwrap())
            .collect();
        assert_eq!(globals, vec![1, 2, 3]);

        let from_second = collect(store.stream_all(2)).await;
        assert_eq!(from_second.len(), 2);
    }
}
