//! Filter and ordering criteria sent to the remote store.
//!
//! Only simple conjunctive predicates are modelled. The same evaluation code
//! orders local snapshots and backs the in-memory backend, so both sides agree
//! on what "sorted by `due_date` descending" means.

use crate::types::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// One column predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    Gt { column: String, value: Value },
    Gte { column: String, value: Value },
    Lt { column: String, value: Value },
    Lte { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsNull { column: String },
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::Neq { column, .. }
            | Predicate::Gt { column, .. }
            | Predicate::Gte { column, .. }
            | Predicate::Lt { column, .. }
            | Predicate::Lte { column, .. }
            | Predicate::In { column, .. }
            | Predicate::IsNull { column } => column,
        }
    }

    /// Evaluate against a row. Missing columns read as `null`.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Predicate::Eq { value, .. } => values_equal(cell, value),
            Predicate::Neq { value, .. } => !cell.is_null() && !values_equal(cell, value),
            Predicate::Gt { value, .. } => compare_values(cell, value) == Some(Ordering::Greater),
            Predicate::Gte { value, .. } => matches!(
                compare_values(cell, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt { value, .. } => compare_values(cell, value) == Some(Ordering::Less),
            Predicate::Lte { value, .. } => matches!(
                compare_values(cell, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::In { values, .. } => values.iter().any(|v| values_equal(cell, v)),
            Predicate::IsNull { .. } => cell.is_null(),
        }
    }
}

/// Conjunction of predicates. The empty filter matches every row
/// ("admins see all").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub predicates: Vec<Predicate>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Predicate::Eq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Predicate::Neq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Predicate::Gte {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Predicate::Lte {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn one_of(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.and(Predicate::In {
            column: column.into(),
            values,
        })
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.and(Predicate::IsNull {
            column: column.into(),
        })
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Stable textual form, used as part of registry keys.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Sort key for `select`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Loose equality: `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Compare two scalars of the same JSON type. Mixed types and compound
/// values are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Row ordering for an `ORDER BY` list. Nulls sort last in both directions.
pub fn compare_rows(a: &Row, b: &Row, order: &[OrderBy]) -> Ordering {
    for key in order {
        let left = a.get(&key.column).unwrap_or(&Value::Null);
        let right = b.get(&key.column).unwrap_or(&Value::Null);

        let ord = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {
                let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort of rows by `order`. No-op for an empty order list.
pub fn sort_rows(rows: &mut [Row], order: &[OrderBy]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| compare_rows(a, b, order));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::all().matches(&row(json!({"id": "1"}))));
    }

    #[test]
    fn test_department_filter() {
        let filter = Filter::all().eq("department_id", "ops");
        assert!(filter.matches(&row(json!({"department_id": "ops"}))));
        assert!(!filter.matches(&row(json!({"department_id": "hr"}))));
        assert!(!filter.matches(&row(json!({}))));
    }

    #[test]
    fn test_range_predicates() {
        let filter = Filter::all().gte("current", 10).lte("current", 20.5);
        assert!(filter.matches(&row(json!({"current": 10}))));
        assert!(filter.matches(&row(json!({"current": 20.5}))));
        assert!(!filter.matches(&row(json!({"current": 21}))));
        assert!(!filter.matches(&row(json!({"current": "15"}))));
    }

    #[test]
    fn test_in_and_null() {
        let filter = Filter::all().one_of("kpi_id", vec![json!("a"), json!("b")]);
        assert!(filter.matches(&row(json!({"kpi_id": "b"}))));
        assert!(!filter.matches(&row(json!({"kpi_id": "c"}))));

        let filter = Filter::all().is_null("archived_at");
        assert!(filter.matches(&row(json!({"archived_at": null}))));
        assert!(filter.matches(&row(json!({}))));
        assert!(!filter.matches(&row(json!({"archived_at": "2024-01-01"}))));
    }

    #[test]
    fn test_sort_rows_desc_nulls_last() {
        let mut rows = vec![
            row(json!({"id": "a", "score": 1})),
            row(json!({"id": "b", "score": null})),
            row(json!({"id": "c", "score": 3})),
        ];
        sort_rows(&mut rows, &[OrderBy::desc("score")]);
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("a"), json!("b")]);
    }

    #[test]
    fn test_cache_key_distinguishes_filters() {
        let a = Filter::all().eq("department_id", "ops");
        let b = Filter::all().eq("department_id", "hr");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
    }
}
