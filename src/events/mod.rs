use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Event Records & Metadata
// ============================================================================
//
// An event record is the unit of persistence: an event type tag, an opaque
// JSON payload, and a string-keyed metadata map. The metadata key set is
// stable and consumed by external tooling, so keys live in one place and
// typed access goes through `Metadata` rather than raw map lookups.
//
// ============================================================================

/// Stable metadata key set. External tooling depends on these exact strings.
pub mod metadata_keys {
    /// Aggregate type that owns the event.
    pub const OWNER: &str = "owner";
    /// Identity of the aggregate root the event belongs to.
    pub const AGGREGATE_ROOT_ID: &str = "root_id";
    /// Zero-based position within the aggregate's own stream.
    pub const SEQUENCE_NUMBER: &str = "seq";
    /// One-based position in the total order across all aggregates,
    /// assigned at append time.
    pub const GLOBAL_SEQUENCE_NUMBER: &str = "gl_seq";
    /// Schema version of the event payload, default 1.
    pub const VERSION: &str = "version";
    /// UTC timestamp stamped at commit time.
    pub const TIME_UTC: &str = "time_utc";
    /// Local-time rendering of `time_utc`; derived, not authoritative.
    pub const TIME_LOCAL: &str = "time_local";
}

/// String-keyed metadata mapping attached to every event record, with
/// typed accessors for the well-known keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    fn required(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(Error::MissingMetadata(key))
    }

    fn required_u64(&self, key: &'static str) -> Result<u64> {
        let value = self.required(key)?;
        value.parse().map_err(|_| Error::MalformedMetadata {
            key,
            value: value.to_string(),
        })
    }

    pub fn owner(&self) -> Result<&str> {
        self.required(metadata_keys::OWNER)
    }

    pub fn aggregate_root_id(&self) -> Result<Uuid> {
        let value = self.required(metadata_keys::AGGREGATE_ROOT_ID)?;
        value.parse().map_err(|_| Error::MalformedMetadata {
            key: metadata_keys::AGGREGATE_ROOT_ID,
            value: value.to_string(),
        })
    }

    pub fn sequence_number(&self) -> Result<u64> {
        self.required_u64(metadata_keys::SEQUENCE_NUMBER)
    }

    pub fn global_sequence_number(&self) -> Result<u64> {
        self.required_u64(metadata_keys::GLOBAL_SEQUENCE_NUMBER)
    }

    /// Schema version of the payload; absent means 1.
    pub fn version(&self) -> Result<u64> {
        if self.contains(metadata_keys::VERSION) {
            self.required_u64(metadata_keys::VERSION)
        } else {
            Ok(1)
        }
    }

    pub fn time_utc(&self) -> Result<DateTime<Utc>> {
        let value = self.required(metadata_keys::TIME_UTC)?;
        value
            .parse()
            .map_err(|_| Error::MalformedMetadata {
                key: metadata_keys::TIME_UTC,
                value: value.to_string(),
            })
    }
}

/// Immutable record of one state transition.
///
/// Payload encoding is the caller's concern; the runtime treats it as an
/// opaque JSON value and never inspects it. Sequence numbers and identity
/// live in `meta` and are stamped by the unit of work (per-aggregate) and
/// the event store (global) on the way to durability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub meta: Metadata,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            meta: Metadata::new(),
        }
    }

    /// Overrides the schema version tag (default 1).
    pub fn with_version(mut self, version: u64) -> Self {
        self.meta.set(metadata_keys::VERSION, version.to_string());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.set(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors_roundtrip() {
        let id = Uuid::new_v4();
        let mut record = EventRecord::new("TaskAdded", json!({ "title": "buy milk" }));
        record.meta.set(metadata_keys::OWNER, "TodoList");
        record.meta.set(metadata_keys::AGGREGATE_ROOT_ID, id.to_string());
        record.meta.set(metadata_keys::SEQUENCE_NUMBER, "0");
        record.meta.set(metadata_keys::GLOBAL_SEQUENCE_NUMBER, "7");

        assert_eq!(record.meta.owner().unwrap(), "TodoList");
        assert_eq!(record.meta.aggregate_root_id().unwrap(), id);
        assert_eq!(record.meta.sequence_number().unwrap(), 0);
        assert_eq!(record.meta.global_sequence_number().unwrap(), 7);
    }

    #[test]
    fn test_version_defaults_to_one() {
        let record = EventRecord::new("TaskAdded", json!({}));
        assert_eq!(record.meta.version().unwrap(), 1);

        let versioned = EventRecord::new("TaskAdded", json!({})).with_version(3);
        assert_eq!(versioned.meta.version().unwrap(), 3);
    }

    #[test]
    fn test_missing_and_malformed_metadata_are_distinct_errors() {
        let mut record = EventRecord::new("TaskAdded", json!({}));

        assert!(matches!(
            record.meta.sequence_number(),
            Err(Error::MissingMetadata(metadata_keys::SEQUENCE_NUMBER))
        ));

        record.meta.set(metadata_keys::SEQUENCE_NUMBER, "not-a-number");
        assert!(matches!(
            record.meta.sequence_number(),
            Err(Error::MalformedMetadata { .. })
        ));
    }

    #[test]
    fn test_records_serialize_for_backends() {
        let record = EventRecord::new("TaskAdded", json!({ "title": "x" }))
            .with_meta(metadata_keys::OWNER, "TodoList");

        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: EventRecord = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, record);
    }
}
