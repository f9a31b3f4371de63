//! The synchronized collection store.

use crate::collection::policy::{ChangeAction, ChangePolicy, CollectionScope, RefetchOnSignal};
use crate::collection::relations::{self, RelationSpec};
use crate::collection::state::{CollectionState, LoadOutcome, PendingOp};
use crate::error::{MutationKind, RemoteError, Result, SyncError, ValidationError};
use crate::patch::{apply_delta, from_row, to_row, Delta};
use crate::query::{Filter, OrderBy};
use crate::remote::{ChangeFeed, FeedSubscription, FeedSubscriptionId, RemoteStore};
use crate::subscriptions::{
    EventBus, EventConfig, EventHandle, EventOrigin, ListenerSet, SyncEvent, Unsubscribe,
};
use crate::types::{
    ChangeNotification, CollectionStatus, EventKind, MutationId, Record, RecordId, Row, Snapshot,
};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Collection configuration.
#[derive(Clone, Debug)]
pub struct CollectionConfig {
    /// Remote table the records live in.
    pub table: String,

    /// Filter for the first load, and for refetches until `load` is called
    /// with another one.
    pub filter: Filter,

    /// Server and snapshot ordering.
    pub order: Vec<OrderBy>,

    /// Child tables denormalized into each record.
    pub relations: Vec<RelationSpec>,

    /// Realtime channel name. Default: `"<table>-changes"`.
    pub channel: Option<String>,
}

impl CollectionConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::all(),
            order: Vec::new(),
            relations: Vec::new(),
            channel: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn with_relation(mut self, relation: RelationSpec) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn channel_name(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| format!("{}-changes", self.table))
    }

    pub fn scope(&self) -> CollectionScope {
        CollectionScope {
            table: self.table.clone(),
            related: self.relations.iter().map(|r| r.table.clone()).collect(),
        }
    }
}

/// Result of handing a notification to a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The table is not in scope (or the collection is closed).
    Ignored,
    /// A refetch was already running; it will run once more when done.
    Coalesced,
    /// This call ran the refetch (plus any coalesced follow-ups).
    Refetched,
}

/// Builder for [`SyncedCollection`].
pub struct CollectionBuilder<R> {
    config: CollectionConfig,
    remote: Arc<dyn RemoteStore>,
    feed: Option<Arc<dyn ChangeFeed>>,
    policy: Arc<dyn ChangePolicy>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> CollectionBuilder<R> {
    pub fn new(config: CollectionConfig, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            config,
            remote,
            feed: None,
            policy: Arc::new(RefetchOnSignal),
            _record: PhantomData,
        }
    }

    /// Listen for realtime changes. Without a feed the collection only
    /// changes through its own calls.
    pub fn change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn ChangePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Create the instance and subscribe to the change feed.
    ///
    /// Nothing is fetched yet; call [`SyncedCollection::load`]. With a change
    /// feed this must run inside a Tokio runtime.
    pub fn open(self) -> Result<SyncedCollection<R>> {
        let state = CollectionState::new(self.config.filter.clone(), self.config.order.clone());
        let inner = Arc::new(Inner {
            config: self.config,
            remote: self.remote,
            feed: self.feed,
            policy: self.policy,
            state: Mutex::new(state),
            listeners: ListenerSet::new(),
            events: EventBus::new(),
            open: AtomicBool::new(true),
            pump: Mutex::new(None),
        });

        if let Some(feed) = &inner.feed {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| SyncError::Runtime(e.to_string()))?;

            let subscription = feed
                .subscribe(&inner.config.channel_name(), &inner.config.scope().tables())
                .map_err(|source| SyncError::Fetch {
                    table: inner.config.table.clone(),
                    source,
                })?;

            let feed_id = subscription.id;
            let task = spawn_pump(&runtime, Arc::downgrade(&inner), subscription);
            *inner.pump.lock() = Some((feed_id, task));
        }

        tracing::debug!(table = %inner.config.table, "collection opened");
        Ok(SyncedCollection { inner })
    }
}

struct Inner<R> {
    config: CollectionConfig,
    remote: Arc<dyn RemoteStore>,
    feed: Option<Arc<dyn ChangeFeed>>,
    policy: Arc<dyn ChangePolicy>,
    state: Mutex<CollectionState<R>>,
    listeners: ListenerSet,
    events: EventBus,
    /// Cleared by `close`. Every async continuation checks it before
    /// touching state.
    open: AtomicBool,
    pump: Mutex<Option<(FeedSubscriptionId, JoinHandle<()>)>>,
}

/// An observable local copy of one remote collection.
///
/// Cloning yields another handle to the same instance.
pub struct SyncedCollection<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SyncedCollection<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn spawn_pump<R: Record>(
    runtime: &tokio::runtime::Handle,
    weak: Weak<Inner<R>>,
    subscription: FeedSubscription,
) -> JoinHandle<()> {
    let mut receiver = subscription.receiver;
    runtime.spawn(async move {
        while let Some(first) = receiver.recv().await {
            // Everything queued while the last refetch ran is served by one more.
            let mut batch = vec![first];
            while let Ok(next) = receiver.try_recv() {
                batch.push(next);
            }

            let Some(inner) = weak.upgrade() else {
                break;
            };
            let collection = SyncedCollection { inner };
            if !collection.is_open() {
                break;
            }

            let scope = collection.inner.config.scope();
            let relevant = batch
                .iter()
                .find(|n| collection.inner.policy.plan(n, &scope) == ChangeAction::Refetch);
            match relevant {
                Some(notification) => {
                    tracing::trace!(
                        table = %collection.table(),
                        received = batch.len(),
                        "folding queued notifications"
                    );
                    collection
                        .on_external_change(&notification.table, notification.event_kind)
                        .await;
                }
                None => {
                    tracing::trace!(table = %collection.table(), received = batch.len(), "no relevant changes");
                }
            }
        }
    })
}

/// Clears the refetch flags if an `on_external_change` call is dropped
/// before it finishes.
struct RefetchFlag<'a, R> {
    state: &'a Mutex<CollectionState<R>>,
    armed: bool,
}

impl<R> Drop for RefetchFlag<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.refetching = false;
            state.refetch_dirty = false;
        }
    }
}

impl<R: Record> SyncedCollection<R> {
    pub fn builder(config: CollectionConfig, remote: Arc<dyn RemoteStore>) -> CollectionBuilder<R> {
        CollectionBuilder::new(config, remote)
    }

    pub fn table(&self) -> &str {
        &self.inner.config.table
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// True if both handles point at the same instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Reads ---

    pub fn snapshot(&self) -> Snapshot<R> {
        let mut snapshot = self.inner.state.lock().snapshot();
        if !self.is_open() {
            snapshot.status = CollectionStatus::Closed;
        }
        snapshot
    }

    pub fn status(&self) -> CollectionStatus {
        self.snapshot().status
    }

    pub fn get(&self, id: &RecordId) -> Option<R> {
        self.inner.state.lock().visible(id).cloned()
    }

    /// Filter the next refetch will use.
    pub fn filter(&self) -> Filter {
        self.inner.state.lock().last_filter.clone()
    }

    // --- Subscriptions ---

    /// Register a snapshot-change callback.
    ///
    /// The callback runs once right away so a new consumer sees the current
    /// snapshot (optimistic records included), then after every change.
    pub fn subscribe<F>(&self, callback: F) -> Result<Unsubscribe>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let id = self.inner.listeners.add(callback);
        self.inner.listeners.notify_one(id);
        Ok(self.inner.listeners.token(id))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Subscribe to the side channel (failures, rollbacks, status).
    pub fn events(&self, config: EventConfig) -> EventHandle {
        self.inner.events.subscribe(config)
    }

    // --- Loads ---

    /// Replace the server base with every row matching `filter`.
    ///
    /// On failure the previous snapshot is kept, the status becomes
    /// `Errored` and a `Failed` event is published.
    pub async fn load(&self, filter: Filter) -> Result<Snapshot<R>> {
        self.fetch(filter, EventOrigin::User).await
    }

    /// `load` with the last-used filter.
    pub async fn refresh(&self) -> Result<Snapshot<R>> {
        let filter = self.filter();
        self.fetch(filter, EventOrigin::User).await
    }

    async fn fetch(&self, filter: Filter, origin: EventOrigin) -> Result<Snapshot<R>> {
        self.ensure_open()?;
        let table = self.table().to_string();

        let (seq, status_changed) = {
            let mut state = self.inner.state.lock();
            let before = state.status();
            let seq = state.begin_load(filter.clone());
            (seq, before != state.status())
        };
        if status_changed {
            self.status_changed(CollectionStatus::Loading);
        }

        tracing::debug!(table = %table, seq, "loading collection");
        let result = self.fetch_records(&filter).await;

        if !self.is_open() {
            tracing::debug!(table = %table, seq, "discarding load for closed collection");
            return Err(SyncError::Closed(table));
        }

        match result {
            Ok(records) => {
                let count = records.len();
                let (outcome, before, snapshot) = {
                    let mut state = self.inner.state.lock();
                    let before = state.status();
                    let outcome = state.apply_load(seq, records);
                    (outcome, before, state.snapshot())
                };

                match outcome {
                    LoadOutcome::Applied => {
                        self.changed();
                        self.inner.events.publish(SyncEvent::Loaded {
                            table: table.clone(),
                            count,
                            version: snapshot.version,
                        });
                        if before != snapshot.status {
                            self.inner.events.publish(SyncEvent::StatusChanged {
                                table,
                                status: snapshot.status,
                            });
                        }
                    }
                    LoadOutcome::Stale => {
                        tracing::debug!(table = %table, seq, "dropping out-of-order load response");
                    }
                }
                Ok(snapshot)
            }
            Err(source) => {
                let error = SyncError::Fetch {
                    table: table.clone(),
                    source,
                };
                let errored = self.inner.state.lock().fail_load(seq);
                if errored {
                    self.status_changed(CollectionStatus::Errored);
                }

                match origin {
                    EventOrigin::User => {
                        tracing::warn!(table = %table, error = %error, "load failed")
                    }
                    EventOrigin::Background => {
                        tracing::warn!(table = %table, error = %error, "background refetch failed")
                    }
                }
                self.inner.events.publish(SyncEvent::Failed {
                    table,
                    origin,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn fetch_records(&self, filter: &Filter) -> std::result::Result<Vec<R>, RemoteError> {
        let config = &self.inner.config;
        let mut rows = self
            .inner
            .remote
            .select(&config.table, filter, &config.order)
            .await?;

        relations::attach(self.inner.remote.as_ref(), &mut rows, &config.relations).await?;

        rows.into_iter()
            .map(|row| from_row::<R>(row).map_err(|e| RemoteError::malformed(e.to_string())))
            .collect()
    }

    // --- Mutations ---

    /// Insert optimistically under a temporary id, then on the server.
    ///
    /// Returns the server-confirmed record. Any id on `record` is replaced.
    pub async fn create(&self, mut record: R) -> Result<R> {
        self.ensure_open()?;
        record.validate()?;

        let temp_id = RecordId::temporary();
        record.set_id(temp_id.clone());
        let row = self.outgoing_row(&record)?;

        let mutation = self.inner.state.lock().push(PendingOp::Create { record });
        self.changed();

        tracing::debug!(table = %self.table(), id = %temp_id, mutation = %mutation, "create issued");
        let result = self.inner.remote.insert(self.table(), row).await;

        let confirmed = result.and_then(|row| {
            from_row::<R>(row).map_err(|e| RemoteError::malformed(e.to_string()))
        });

        if !self.is_open() {
            tracing::debug!(table = %self.table(), mutation = %mutation, "create resolved after close");
            return confirmed.map_err(|source| self.mutation_error(MutationKind::Create, &temp_id, source));
        }

        match confirmed {
            Ok(record) => {
                self.inner.state.lock().confirm(mutation, Some(record.clone()));
                self.changed();
                self.confirmed(MutationKind::Create, record.id().clone());
                Ok(record)
            }
            Err(source) => Err(self.roll_back(mutation, MutationKind::Create, &temp_id, source)),
        }
    }

    /// Patch a record locally, then on the server.
    pub async fn update(&self, id: &RecordId, delta: Delta) -> Result<()> {
        self.ensure_open()?;
        self.check_delta(&delta)?;

        let mutation = {
            let mut state = self.inner.state.lock();
            let current = state
                .visible(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            if id.is_temporary() {
                return Err(SyncError::PendingCreate(id.clone()));
            }
            apply_delta(current, &delta)?;
            state.push(PendingOp::Update {
                id: id.clone(),
                delta: delta.clone(),
            })
        };
        self.changed();

        tracing::debug!(table = %self.table(), id = %id, mutation = %mutation, "update issued");
        let result = self.inner.remote.update(self.table(), id, &delta).await;

        if !self.is_open() {
            tracing::debug!(table = %self.table(), mutation = %mutation, "update resolved after close");
            return result.map_err(|source| self.mutation_error(MutationKind::Update, id, source));
        }

        match result {
            Ok(()) => {
                self.inner.state.lock().confirm(mutation, None);
                self.changed();
                self.confirmed(MutationKind::Update, id.clone());
                Ok(())
            }
            Err(source) => Err(self.roll_back(mutation, MutationKind::Update, id, source)),
        }
    }

    /// Remove a record locally, then on the server.
    pub async fn remove(&self, id: &RecordId) -> Result<()> {
        self.ensure_open()?;

        let mutation = {
            let mut state = self.inner.state.lock();
            if state.visible(id).is_none() {
                return Err(SyncError::NotFound(id.clone()));
            }
            if id.is_temporary() {
                return Err(SyncError::PendingCreate(id.clone()));
            }
            state.push(PendingOp::Delete { id: id.clone() })
        };
        self.changed();

        tracing::debug!(table = %self.table(), id = %id, mutation = %mutation, "delete issued");
        let result = self.inner.remote.delete(self.table(), id).await;

        if !self.is_open() {
            tracing::debug!(table = %self.table(), mutation = %mutation, "delete resolved after close");
            return result.map_err(|source| self.mutation_error(MutationKind::Delete, id, source));
        }

        match result {
            Ok(()) => {
                self.inner.state.lock().confirm(mutation, None);
                self.changed();
                self.confirmed(MutationKind::Delete, id.clone());
                Ok(())
            }
            Err(source) => Err(self.roll_back(mutation, MutationKind::Delete, id, source)),
        }
    }

    // --- Change feed ---

    /// React to "a row in `table` changed".
    ///
    /// In-scope notifications trigger a full refetch with the last-used
    /// filter. Notifications arriving during that refetch are folded into a
    /// single follow-up refetch. Failures are logged and published as
    /// background failures; the snapshot is kept.
    pub async fn on_external_change(&self, table: &str, event_hint: Option<EventKind>) -> ChangeOutcome {
        if !self.is_open() {
            return ChangeOutcome::Ignored;
        }

        let notification = ChangeNotification::new(table, event_hint);
        let scope = self.inner.config.scope();
        if self.inner.policy.plan(&notification, &scope) == ChangeAction::Ignore {
            tracing::trace!(table = %self.table(), changed = %table, "ignoring unrelated change");
            return ChangeOutcome::Ignored;
        }

        {
            let mut state = self.inner.state.lock();
            if state.refetching {
                state.refetch_dirty = true;
                return ChangeOutcome::Coalesced;
            }
            state.refetching = true;
        }
        let mut flag = RefetchFlag {
            state: &self.inner.state,
            armed: true,
        };

        loop {
            let filter = self.filter();
            if let Err(e) = self.fetch(filter, EventOrigin::Background).await {
                tracing::debug!(table = %self.table(), error = %e, "refetch after change failed");
            }

            let again = {
                let mut state = self.inner.state.lock();
                let again = state.refetch_dirty && self.is_open();
                state.refetch_dirty = false;
                if !again {
                    state.refetching = false;
                    flag.armed = false;
                }
                again
            };
            if !again {
                break;
            }
        }

        ChangeOutcome::Refetched
    }

    // --- Lifecycle ---

    /// Tear down: unsubscribe from the feed, drop listeners and event
    /// subscribers. In-flight calls still resolve but no longer touch state.
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some((feed_id, task)) = self.inner.pump.lock().take() {
            task.abort();
            if let Some(feed) = &self.inner.feed {
                feed.unsubscribe(feed_id);
            }
        }

        self.inner.state.lock().set_status(CollectionStatus::Closed);
        self.inner.listeners.clear();
        self.inner.events.close();
        tracing::debug!(table = %self.table(), "collection closed");
    }

    // --- Helpers ---

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SyncError::Closed(self.table().to_string()))
        }
    }

    fn changed(&self) {
        self.inner.listeners.notify();
    }

    fn status_changed(&self, status: CollectionStatus) {
        self.changed();
        self.inner.events.publish(SyncEvent::StatusChanged {
            table: self.table().to_string(),
            status,
        });
    }

    fn confirmed(&self, kind: MutationKind, id: RecordId) {
        self.inner.events.publish(SyncEvent::Confirmed {
            table: self.table().to_string(),
            kind,
            id,
        });
    }

    fn mutation_error(&self, kind: MutationKind, id: &RecordId, source: RemoteError) -> SyncError {
        SyncError::Mutation {
            table: self.table().to_string(),
            kind,
            id: id.clone(),
            source,
        }
    }

    /// Undo the optimistic change, notify, then report.
    fn roll_back(
        &self,
        mutation: MutationId,
        kind: MutationKind,
        id: &RecordId,
        source: RemoteError,
    ) -> SyncError {
        self.inner.state.lock().rollback(mutation);
        self.changed();

        let error = self.mutation_error(kind, id, source);
        tracing::warn!(table = %self.table(), id = %id, error = %error, "rolled back {}", kind);
        self.inner.events.publish(SyncEvent::RolledBack {
            table: self.table().to_string(),
            kind,
            id: id.clone(),
            error: error.clone(),
        });
        error
    }

    /// Row sent to the server: no id (the server assigns it) and no
    /// denormalized relation fields.
    fn outgoing_row(&self, record: &R) -> Result<Row> {
        let mut row = to_row(record)?;
        row.remove("id");
        for relation in &self.inner.config.relations {
            row.remove(&relation.field);
        }
        Ok(row)
    }

    fn check_delta(&self, delta: &Delta) -> Result<()> {
        if delta.is_empty() {
            return Err(ValidationError::new("delta", "is empty").into());
        }
        if let Some(relation) = self
            .inner
            .config
            .relations
            .iter()
            .find(|r| delta.contains_key(&r.field))
        {
            return Err(ValidationError::new(
                relation.field.clone(),
                format!("is loaded from {} and cannot be updated here", relation.table),
            )
            .into());
        }
        Ok(())
    }
}

impl<R> Drop for Inner<R> {
    fn drop(&mut self) {
        if let Some((feed_id, task)) = self.pump.get_mut().take() {
            task.abort();
            if let Some(feed) = &self.feed {
                feed.unsubscribe(feed_id);
            }
        }
    }
}
