//! Reaction to change-feed notifications.

use crate::types::ChangeNotification;

/// Tables a collection's snapshot is derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionScope {
    /// The table rows are selected from.
    pub table: String,
    /// Tables joined in client-side as relations.
    pub related: Vec<String>,
}

impl CollectionScope {
    pub fn touches(&self, table: &str) -> bool {
        self.table == table || self.related.iter().any(|t| t == table)
    }

    /// Every table the collection listens to.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = vec![self.table.clone()];
        for t in &self.related {
            if !tables.contains(t) {
                tables.push(t.clone());
            }
        }
        tables
    }
}

/// What to do about a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    Ignore,
    Refetch,
}

/// Decides how a collection reacts to a change notification.
///
/// The feed carries no row data, so the only sound default is a full
/// refetch. An implementation that patches single rows can replace it.
pub trait ChangePolicy: Send + Sync {
    fn plan(&self, notification: &ChangeNotification, scope: &CollectionScope) -> ChangeAction;
}

/// Refetch whenever a table in scope changes; ignore everything else.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefetchOnSignal;

impl ChangePolicy for RefetchOnSignal {
    fn plan(&self, notification: &ChangeNotification, scope: &CollectionScope) -> ChangeAction {
        if scope.touches(&notification.table) {
            ChangeAction::Refetch
        } else {
            ChangeAction::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    fn scope() -> CollectionScope {
        CollectionScope {
            table: "okrs".into(),
            related: vec!["key_results".into(), "key_results".into()],
        }
    }

    #[test]
    fn test_refetch_for_source_and_relations_only() {
        let policy = RefetchOnSignal;
        let s = scope();

        let own = ChangeNotification::new("okrs", Some(EventKind::Insert));
        let child = ChangeNotification::new("key_results", None);
        let other = ChangeNotification::new("kpis", Some(EventKind::Update));

        assert_eq!(policy.plan(&own, &s), ChangeAction::Refetch);
        assert_eq!(policy.plan(&child, &s), ChangeAction::Refetch);
        assert_eq!(policy.plan(&other, &s), ChangeAction::Ignore);
    }

    #[test]
    fn test_tables_deduplicated() {
        assert_eq!(scope().tables(), vec!["okrs".to_string(), "key_results".to_string()]);
    }
}
