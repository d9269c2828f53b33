use uuid::Uuid;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// Every failure the runtime can surface, in one enum. Nothing in here is
// retried automatically: a conflicting commit must be re-derived by the
// caller against fresh state, and view failures never roll back a commit.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An append assumed a stale base sequence number for an aggregate.
    /// The whole batch was rejected; nothing was persisted.
    #[error(
        "concurrency conflict on aggregate {aggregate_root_id}: \
         batch assumed sequence {assumed_sequence_number}, store expects {current_sequence_number}"
    )]
    ConcurrencyConflict {
        aggregate_root_id: Uuid,
        assumed_sequence_number: u64,
        current_sequence_number: u64,
    },

    /// A required load found zero events at or below the requested cutoff.
    #[error("aggregate root not found: {aggregate_root_id}")]
    AggregateRootNotFound { aggregate_root_id: Uuid },

    /// An aggregate was asked to apply an event type it declares no handler
    /// for. This is a programming defect, not a retryable condition.
    #[error("aggregate type {owner:?} has no handler for event type {event_type:?}")]
    UnhandledEventType { owner: String, event_type: String },

    /// The durable backend failed. Retryable at the caller's discretion.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// A view manager failed while consuming an already-committed batch.
    /// The store state is unaffected; other view managers still ran.
    #[error(
        "view manager {view:?} failed at global sequence {global_sequence_number}: {source}"
    )]
    ViewDispatch {
        view: String,
        global_sequence_number: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A view manager failed to purge its storage during initialization.
    #[error("view manager {view:?} failed to purge: {source}")]
    ViewPurge {
        view: String,
        #[source]
        source: anyhow::Error,
    },

    /// Appending an empty batch is always a caller bug.
    #[error("cannot append an empty event batch")]
    EmptyBatch,

    /// A committed event record lacked a required metadata key.
    #[error("event metadata is missing required key {0:?}")]
    MissingMetadata(&'static str),

    /// A metadata value could not be parsed as its expected type.
    #[error("event metadata key {key:?} holds malformed value {value:?}")]
    MalformedMetadata { key: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
