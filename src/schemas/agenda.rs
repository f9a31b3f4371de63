//! Scheduled events.

use crate::collection::CollectionConfig;
use crate::error::ValidationError;
use crate::query::{Filter, OrderBy};
use crate::types::{Record, RecordId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const TABLE: &str = "agenda_events";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgendaEvent {
    pub id: RecordId,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// `None` for company-wide events.
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl AgendaEvent {
    /// Events starting inside `[from, to]`, earliest first.
    pub fn collection(from: DateTime<Utc>, to: DateTime<Utc>) -> CollectionConfig {
        CollectionConfig::new(TABLE)
            .with_filter(
                Filter::all()
                    .gte("starts_at", timestamp(from))
                    .lte("starts_at", timestamp(to)),
            )
            .order_by(OrderBy::asc("starts_at"))
    }
}

/// Same textual form serde produces for `DateTime<Utc>`, so range filters
/// compare like with like.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl Record for AgendaEvent {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::new("title", "is required"));
        }
        if let Some(end) = self.ends_at {
            if end < self.starts_at {
                return Err(ValidationError::new("ends_at", "is before starts_at"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_end_before_start_is_invalid() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut event = AgendaEvent {
            id: RecordId::from("1"),
            title: "Gemba walk".into(),
            starts_at: start,
            ends_at: Some(start - chrono::Duration::hours(1)),
            department_id: None,
            location: None,
        };
        assert!(event.validate().is_err());

        event.ends_at = Some(start + chrono::Duration::hours(1));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_filter_uses_serde_timestamp_form() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let serialized = serde_json::to_value(t).unwrap();
        assert_eq!(serialized, serde_json::Value::String(timestamp(t)));
    }
}
