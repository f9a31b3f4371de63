//! Core types for synchronized collections.

use crate::error::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Prefix marking ids generated on the client before the server confirms.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Untyped row as it crosses the remote boundary.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a record.
///
/// Assigned by the remote store on insert. Until then a record carries a
/// temporary id starting with [`TEMP_ID_PREFIX`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Fresh client-side placeholder id.
    pub fn temporary() -> Self {
        RecordId(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// A typed row of one collection.
///
/// Each collection has exactly one record shape. Rows coming back from the
/// remote store are deserialized into it and checked with [`Record::validate`]
/// before they are accepted into a snapshot.
pub trait Record: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> &RecordId;

    fn set_id(&mut self, id: RecordId);

    /// Shape and range checks. Runs before every remote write and on every
    /// row received from the remote store.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Identifier of a queued optimistic mutation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(pub u64);

impl fmt::Debug for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mutation({})", self.0)
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a collection instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// Opened, nothing fetched yet.
    Uninitialized,
    /// A load is in flight.
    Loading,
    /// Last load succeeded.
    Ready,
    /// Last load failed. The previous snapshot is still visible.
    Errored,
    /// Torn down. Only observable through handles that outlived the close.
    Closed,
}

/// Kind of row change announced by the change feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// "A row in `table` changed". Carries no row data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub table: String,
    #[serde(default)]
    pub event_kind: Option<EventKind>,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_schema() -> String {
    "public".to_string()
}

impl ChangeNotification {
    pub fn new(table: impl Into<String>, event_kind: Option<EventKind>) -> Self {
        Self {
            table: table.into(),
            event_kind,
            schema: default_schema(),
        }
    }
}

/// Immutable view of a collection at one point in time.
///
/// Cloning is cheap; the records are shared.
#[derive(Clone, Debug)]
pub struct Snapshot<R> {
    pub records: Arc<Vec<R>>,
    pub status: CollectionStatus,
    /// Bumped on every visible change.
    pub version: u64,
    /// Optimistic mutations not yet confirmed or rolled back.
    pub pending: usize,
}

impl<R: Record> Snapshot<R> {
    pub fn get(&self, id: &RecordId) -> Option<&R> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids_are_unique() {
        let a = RecordId::temporary();
        let b = RecordId::temporary();
        assert!(a.is_temporary());
        assert_ne!(a, b);
        assert!(!RecordId::from("42").is_temporary());
    }

    #[test]
    fn test_notification_wire_shape() {
        let n: ChangeNotification =
            serde_json::from_str(r#"{"table":"kpis","event_kind":"UPDATE"}"#).unwrap();
        assert_eq!(n.table, "kpis");
        assert_eq!(n.event_kind, Some(EventKind::Update));
        assert_eq!(n.schema, "public");
    }
}
