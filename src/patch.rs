//! Conversion between typed records and rows, and delta application.

use crate::error::{Result, SyncError, ValidationError};
use crate::types::{Record, Row};
use serde_json::Value;

/// Partial row merged into a record by `update`.
pub type Delta = Row;

/// Serialize a record into its row shape.
pub fn to_row<R: Record>(record: &R) -> Result<Row> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Serialization(format!(
            "record serialized to a non-object: {}",
            other
        ))),
    }
}

/// Deserialize and validate a row received from the remote store.
pub fn from_row<R: Record>(row: Row) -> Result<R> {
    let record: R = serde_json::from_value(Value::Object(row))
        .map_err(|e| SyncError::Serialization(e.to_string()))?;
    record.validate()?;
    Ok(record)
}

/// Apply a delta to a record, producing the patched copy.
///
/// Top-level fields in the delta replace the record's fields; a `null`
/// clears an optional field. The id is not patchable.
pub fn apply_delta<R: Record>(record: &R, delta: &Delta) -> Result<R> {
    if delta.contains_key("id") {
        return Err(ValidationError::new("id", "cannot be changed by an update").into());
    }

    let mut row = to_row(record)?;
    for (field, value) in delta {
        row.insert(field.clone(), value.clone());
    }

    let patched: R = serde_json::from_value(Value::Object(row))
        .map_err(|e| SyncError::Validation(ValidationError::new("delta", e.to_string())))?;
    patched.validate()?;
    Ok(patched)
}

/// Apply a delta to a raw row. Used by backends.
pub fn merge_row(row: &mut Row, delta: &Delta) {
    for (field, value) in delta {
        row.insert(field.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordId;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Gauge {
        id: RecordId,
        current: f64,
        #[serde(default)]
        note: Option<String>,
    }

    impl Record for Gauge {
        fn id(&self) -> &RecordId {
            &self.id
        }
        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }
        fn validate(&self) -> std::result::Result<(), ValidationError> {
            if self.current < 0.0 {
                return Err(ValidationError::new("current", "must not be negative"));
            }
            Ok(())
        }
    }

    fn delta(v: Value) -> Delta {
        v.as_object().cloned().unwrap()
    }

    fn gauge() -> Gauge {
        Gauge {
            id: RecordId::from("1"),
            current: 87.0,
            note: Some("q3".into()),
        }
    }

    #[test]
    fn test_apply_delta_replaces_fields() {
        let patched = apply_delta(&gauge(), &delta(json!({"current": 92}))).unwrap();
        assert_eq!(patched.current, 92.0);
        assert_eq!(patched.note.as_deref(), Some("q3"));
    }

    #[test]
    fn test_null_clears_optional_field() {
        let patched = apply_delta(&gauge(), &delta(json!({"note": null}))).unwrap();
        assert_eq!(patched.note, None);
    }

    #[test]
    fn test_delta_cannot_change_id() {
        let err = apply_delta(&gauge(), &delta(json!({"id": "2"}))).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_delta_with_wrong_type_is_validation_error() {
        let err = apply_delta(&gauge(), &delta(json!({"current": "high"}))).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_delta_violating_range_is_rejected() {
        let err = apply_delta(&gauge(), &delta(json!({"current": -1}))).unwrap_err();
        match err {
            SyncError::Validation(v) => assert_eq!(v.field, "current"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_row_validates() {
        let row = delta(json!({"id": "9", "current": -5}));
        assert!(from_row::<Gauge>(row).is_err());

        let row = delta(json!({"id": "9", "current": 5}));
        let g: Gauge = from_row(row).unwrap();
        assert_eq!(g.note, None);
    }
}
