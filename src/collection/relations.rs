//! Client-side denormalization of child rows.

use crate::error::RemoteError;
use crate::query::{Filter, OrderBy};
use crate::remote::RemoteStore;
use crate::types::Row;
use serde_json::Value;
use std::collections::HashMap;

/// A one-to-many relation attached to every parent row after a load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationSpec {
    /// Child table.
    pub table: String,
    /// Column on the child pointing at the parent's `id`.
    pub foreign_key: String,
    /// Field on the parent the children are stored under.
    pub field: String,
    /// Child ordering.
    pub order: Vec<OrderBy>,
}

impl RelationSpec {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            field: field.into(),
            order: Vec::new(),
        }
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }
}

/// Fetch children for every relation with one `IN` query each and attach
/// them to their parents. Parents without children get an empty array.
pub(crate) async fn attach(
    remote: &dyn RemoteStore,
    parents: &mut [Row],
    relations: &[RelationSpec],
) -> Result<(), RemoteError> {
    if parents.is_empty() {
        return Ok(());
    }

    let parent_ids: Vec<Value> = parents
        .iter()
        .filter_map(|p| p.get("id").cloned())
        .collect();

    for relation in relations {
        let filter = Filter::all().one_of(relation.foreign_key.clone(), parent_ids.clone());
        let children = remote.select(&relation.table, &filter, &relation.order).await?;

        let mut by_parent: HashMap<String, Vec<Value>> = HashMap::new();
        for child in children {
            if let Some(key) = child.get(&relation.foreign_key).map(key_of) {
                by_parent.entry(key).or_default().push(Value::Object(child));
            }
        }

        for parent in parents.iter_mut() {
            let key = parent.get("id").map(key_of).unwrap_or_default();
            let children = by_parent.remove(&key).unwrap_or_default();
            parent.insert(relation.field.clone(), Value::Array(children));
        }

        tracing::trace!(relation = %relation.table, "attached relation");
    }

    Ok(())
}

fn key_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
