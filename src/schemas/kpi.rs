//! Key performance indicators.

use crate::collection::{CollectionConfig, RelationSpec};
use crate::error::ValidationError;
use crate::query::{Filter, OrderBy};
use crate::types::{Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TABLE: &str = "kpis";
pub const HISTORY_TABLE: &str = "kpi_history";

/// One indicator with its measurement history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub id: RecordId,
    pub name: String,
    pub department_id: String,
    pub current: f64,
    pub target: f64,
    #[serde(default)]
    pub unit: Option<String>,
    /// Lower is better (defects, lead time).
    #[serde(default)]
    pub lower_is_better: bool,
    /// Loaded from `kpi_history`, newest first.
    #[serde(default)]
    pub history: Vec<KpiMeasurement>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KpiMeasurement {
    pub id: RecordId,
    pub kpi_id: RecordId,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl Kpi {
    pub fn new(name: impl Into<String>, department_id: impl Into<String>, current: f64, target: f64) -> Self {
        Self {
            id: RecordId::from(""),
            name: name.into(),
            department_id: department_id.into(),
            current,
            target,
            unit: None,
            lower_is_better: false,
            history: Vec::new(),
        }
    }

    /// Whether the indicator currently meets its target.
    pub fn on_target(&self) -> bool {
        if self.lower_is_better {
            self.current <= self.target
        } else {
            self.current >= self.target
        }
    }

    /// Collection of KPIs visible to a department, or all of them for admins.
    pub fn collection(department_id: Option<&str>) -> CollectionConfig {
        let filter = match department_id {
            Some(dept) => Filter::all().eq("department_id", dept),
            None => Filter::all(),
        };

        CollectionConfig::new(TABLE)
            .with_filter(filter)
            .order_by(OrderBy::asc("name"))
            .with_relation(
                RelationSpec::new(HISTORY_TABLE, "kpi_id", "history")
                    .order_by(OrderBy::desc("recorded_at")),
            )
    }
}

impl Record for Kpi {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "is required"));
        }
        if self.department_id.trim().is_empty() {
            return Err(ValidationError::new("department_id", "is required"));
        }
        if !self.current.is_finite() {
            return Err(ValidationError::new("current", "must be a number"));
        }
        if !self.target.is_finite() {
            return Err(ValidationError::new("target", "must be a number"));
        }
        Ok(())
    }
}
