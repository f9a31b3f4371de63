//! Shared, reference-counted collection instances.
//!
//! Several views often read the same table with the same filter (the KPI
//! page and the dashboard both show department KPIs). The registry hands
//! them one instance per (table, filter, order, relations, channel) key.
//! Leases cannot move the shared instance to another filter. The first lease
//! opens the instance and runs the initial load; dropping the last lease
//! closes it. A later acquire for the same key gets a fresh instance, and
//! the old one's late responses are discarded by its own staleness guard.

use crate::collection::{ChangePolicy, CollectionConfig, SyncedCollection};
use crate::error::{Result, SyncError, ValidationError};
use crate::remote::{ChangeFeed, RemoteStore};
use crate::query::Filter;
use crate::types::{Record, Snapshot};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RegistryKey {
    table: String,
    filter: String,
    order: String,
    relations: Vec<String>,
    channel: String,
}

impl RegistryKey {
    fn of(config: &CollectionConfig) -> Self {
        Self {
            table: config.table.clone(),
            filter: config.filter.cache_key(),
            order: serde_json::to_string(&config.order).unwrap_or_default(),
            relations: config
                .relations
                .iter()
                .map(|r| {
                    format!(
                        "{}.{}->{}:{}",
                        r.table,
                        r.foreign_key,
                        r.field,
                        serde_json::to_string(&r.order).unwrap_or_default()
                    )
                })
                .collect(),
            channel: config.channel_name(),
        }
    }
}

struct Entry {
    collection: Box<dyn Any + Send + Sync>,
    refs: usize,
}

type Entries = Arc<Mutex<HashMap<RegistryKey, Entry>>>;

/// Hands out shared collection instances.
#[derive(Clone)]
pub struct CollectionRegistry {
    remote: Arc<dyn RemoteStore>,
    feed: Option<Arc<dyn ChangeFeed>>,
    policy: Option<Arc<dyn ChangePolicy>>,
    entries: Entries,
}

impl CollectionRegistry {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            feed: None,
            policy: None,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe instances opened from now on to `feed`.
    pub fn with_change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Use `policy` for instances opened from now on.
    pub fn with_policy(mut self, policy: Arc<dyn ChangePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Get a lease on the shared instance for `config`, opening and loading
    /// it if this is the first one.
    ///
    /// A failed initial load does not fail the acquire: the lease is
    /// returned with the collection `Errored`, and the view can `refresh`.
    pub async fn acquire<R: Record>(&self, config: CollectionConfig) -> Result<CollectionLease<R>> {
        let key = RegistryKey::of(&config);

        let (collection, fresh) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some(entry) => {
                    let collection = entry
                        .collection
                        .downcast_ref::<SyncedCollection<R>>()
                        .cloned()
                        .ok_or_else(|| {
                            ValidationError::new(
                                "record type",
                                format!("{} is already open with another record type", key.table),
                            )
                        })?;
                    entry.refs += 1;
                    (collection, false)
                }
                None => {
                    let mut builder = SyncedCollection::<R>::builder(config, Arc::clone(&self.remote));
                    if let Some(feed) = &self.feed {
                        builder = builder.change_feed(Arc::clone(feed));
                    }
                    if let Some(policy) = &self.policy {
                        builder = builder.policy(Arc::clone(policy));
                    }
                    let collection = builder.open()?;
                    entries.insert(
                        key.clone(),
                        Entry {
                            collection: Box::new(collection.clone()),
                            refs: 1,
                        },
                    );
                    (collection, true)
                }
            }
        };

        let lease = CollectionLease {
            collection,
            key,
            entries: Arc::clone(&self.entries),
        };

        if fresh {
            let filter = lease.filter();
            if let Err(e) = lease.load(filter).await {
                if !matches!(e, SyncError::Closed(_)) {
                    tracing::warn!(table = %lease.table(), error = %e, "initial load failed");
                }
            }
        }

        Ok(lease)
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Leases held on the instance for `config`.
    pub fn ref_count(&self, config: &CollectionConfig) -> usize {
        self.entries
            .lock()
            .get(&RegistryKey::of(config))
            .map(|e| e.refs)
            .unwrap_or(0)
    }
}

/// A counted reference to a shared collection. Dereferences to the
/// collection; dropping it releases the reference.
pub struct CollectionLease<R: Record> {
    collection: SyncedCollection<R>,
    key: RegistryKey,
    entries: Entries,
}

impl<R: Record> CollectionLease<R> {
    /// The underlying collection handle. It stays usable for reads after
    /// the lease is gone, but a closed instance rejects writes.
    pub fn collection(&self) -> &SyncedCollection<R> {
        &self.collection
    }

    pub fn release(self) {}

    /// Reload the shared instance.
    ///
    /// Every holder shares the filter the instance was acquired with, so
    /// only that filter is accepted here. Acquire another lease to read a
    /// different slice.
    pub async fn load(&self, filter: Filter) -> Result<Snapshot<R>> {
        if filter.cache_key() != self.key.filter {
            return Err(ValidationError::new(
                "filter",
                format!("{} is shared; acquire a lease for the new filter", self.key.table),
            )
            .into());
        }
        self.collection.load(filter).await
    }
}

impl<R: Record> Deref for CollectionLease<R> {
    type Target = SyncedCollection<R>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

impl<R: Record> Drop for CollectionLease<R> {
    fn drop(&mut self) {
        let last = {
            let mut entries = self.entries.lock();

            // A newer instance may sit under the same key once this one closed.
            let ours = entries
                .get(&self.key)
                .and_then(|e| e.collection.downcast_ref::<SyncedCollection<R>>())
                .map(|c| c.same_instance(&self.collection))
                .unwrap_or(false);

            let remaining = match entries.get_mut(&self.key) {
                Some(entry) if ours => {
                    entry.refs -= 1;
                    Some(entry.refs)
                }
                _ => None,
            };

            if remaining == Some(0) {
                entries.remove(&self.key);
                true
            } else {
                false
            }
        };

        if last {
            self.collection.close();
        }
    }
}
