//! Objectives and key results.

use crate::collection::{CollectionConfig, RelationSpec};
use crate::error::ValidationError;
use crate::query::{Filter, OrderBy};
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};

pub const TABLE: &str = "okrs";
pub const KEY_RESULTS_TABLE: &str = "key_results";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Okr {
    pub id: RecordId,
    pub objective: String,
    pub department_id: String,
    /// `YYYY-Qn`, e.g. `2024-Q3`.
    pub quarter: String,
    #[serde(default)]
    pub key_results: Vec<KeyResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyResult {
    pub id: RecordId,
    pub okr_id: RecordId,
    pub description: String,
    pub current: f64,
    pub target: f64,
}

impl KeyResult {
    /// Completion in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.target == 0.0 {
            return 0.0;
        }
        (self.current / self.target).clamp(0.0, 1.0)
    }
}

impl Okr {
    pub fn new(
        objective: impl Into<String>,
        department_id: impl Into<String>,
        quarter: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::from(""),
            objective: objective.into(),
            department_id: department_id.into(),
            quarter: quarter.into(),
            key_results: Vec::new(),
        }
    }

    /// Mean progress of the key results; zero without any.
    pub fn progress(&self) -> f64 {
        if self.key_results.is_empty() {
            return 0.0;
        }
        self.key_results.iter().map(KeyResult::progress).sum::<f64>() / self.key_results.len() as f64
    }

    pub fn collection(department_id: Option<&str>, quarter: &str) -> CollectionConfig {
        let mut filter = Filter::all().eq("quarter", quarter);
        if let Some(dept) = department_id {
            filter = filter.eq("department_id", dept);
        }

        CollectionConfig::new(TABLE)
            .with_filter(filter)
            .order_by(OrderBy::asc("objective"))
            .with_relation(
                RelationSpec::new(KEY_RESULTS_TABLE, "okr_id", "key_results")
                    .order_by(OrderBy::asc("description")),
            )
    }
}

fn valid_quarter(quarter: &str) -> bool {
    match quarter.split_once("-Q") {
        Some((year, q)) => {
            year.len() == 4
                && year.chars().all(|c| c.is_ascii_digit())
                && matches!(q, "1" | "2" | "3" | "4")
        }
        None => false,
    }
}

impl Record for Okr {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.objective.trim().is_empty() {
            return Err(ValidationError::new("objective", "is required"));
        }
        if !valid_quarter(&self.quarter) {
            return Err(ValidationError::new("quarter", "must look like 2024-Q3"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kr(current: f64, target: f64) -> KeyResult {
        KeyResult {
            id: RecordId::from("kr"),
            okr_id: RecordId::from("o"),
            description: "x".into(),
            current,
            target,
        }
    }

    #[test]
    fn test_progress_is_mean_of_clamped_key_results() {
        let mut okr = Okr::new("Ship v2", "eng", "2024-Q3");
        assert_eq!(okr.progress(), 0.0);

        okr.key_results = vec![kr(50.0, 100.0), kr(300.0, 100.0), kr(1.0, 0.0)];
        assert!((okr.progress() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_quarter_format() {
        assert!(Okr::new("a", "eng", "2024-Q4").validate().is_ok());
        assert!(Okr::new("a", "eng", "2024-Q5").validate().is_err());
        assert!(Okr::new("a", "eng", "24-Q1").validate().is_err());
        assert!(Okr::new("a", "eng", "Q1").validate().is_err());
    }
}
