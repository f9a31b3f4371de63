//! In-memory backend.
//!
//! Implements [`RemoteStore`], [`ChangeFeed`] and [`PrivilegedEndpoint`] over
//! plain tables held in memory. Writes emit change notifications the same
//! way the hosted feed does (table name only, no row). Calls can be made to
//! fail or to wait at a [`Gate`], which is how tests hold a response "in
//! flight".

use crate::error::RemoteError;
use crate::patch::{merge_row, Delta};
use crate::query::{sort_rows, Filter, OrderBy};
use crate::remote::{
    ChangeFeed, EndpointError, FeedSubscription, FeedSubscriptionId, PrivilegedEndpoint,
    RemoteStore,
};
use crate::types::{ChangeNotification, EventKind, RecordId, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Remote operation kinds, for failure injection and gating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

type FunctionHandler = Arc<dyn Fn(&str, Value) -> Result<Value, EndpointError> + Send + Sync>;

struct FeedSubscriber {
    channel: String,
    tables: Vec<String>,
    sender: mpsc::UnboundedSender<ChangeNotification>,
}

/// Holds calls of one operation kind until opened.
pub struct Gate {
    open: watch::Sender<bool>,
    waiting: AtomicUsize,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Let every held and future call through.
    pub fn release(&self) {
        self.open.send_replace(true);
    }

    /// Calls currently parked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Yield until at least `n` calls are parked.
    pub async fn arrived(&self, n: usize) {
        while self.waiting() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _ = rx.wait_for(|open| *open).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory tables with a change feed.
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    failures: Mutex<HashMap<Operation, VecDeque<RemoteError>>>,
    gates: Mutex<HashMap<Operation, Arc<Gate>>>,
    calls: Mutex<HashMap<Operation, usize>>,
    subscribers: Mutex<HashMap<FeedSubscriptionId, FeedSubscriber>>,
    functions: Mutex<HashMap<String, FunctionHandler>>,
    next_subscription: AtomicU64,
    emit_on_write: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            emit_on_write: AtomicBool::new(true),
        }
    }

    // --- Data ---

    /// Insert rows directly, without notifications. Rows must be JSON objects.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut tables = self.tables.lock();
        let target = tables.entry(table.to_string()).or_default();
        for row in rows {
            match row {
                Value::Object(mut map) => {
                    map.entry("id".to_string())
                        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
                    target.push(map);
                }
                other => tracing::warn!(table, row = %other, "ignoring non-object seed row"),
            }
        }
    }

    /// Current rows of a table, in storage order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        self.tables
            .lock()
            .get(table)?
            .iter()
            .find(|r| id_matches(r, id))
            .cloned()
    }

    // --- Fault injection ---

    /// Fail the next call of `op` with `error`. Queued errors are consumed
    /// in order.
    pub fn fail_next(&self, op: Operation, error: RemoteError) {
        self.failures.lock().entry(op).or_default().push_back(error);
    }

    /// Park every call of `op` until the returned gate is released.
    pub fn hold(&self, op: Operation) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.gates.lock().insert(op, Arc::clone(&gate));
        gate
    }

    /// Stop holding `op`. Already-parked calls stay parked until their gate
    /// is released.
    pub fn unhold(&self, op: Operation) {
        self.gates.lock().remove(&op);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    // --- Feed control ---

    /// Whether writes emit notifications (default true).
    pub fn set_emit_on_write(&self, emit: bool) {
        self.emit_on_write.store(emit, Ordering::SeqCst);
    }

    /// Deliver a notification to every subscriber listening to `table`, as
    /// if another client changed it.
    pub fn emit(&self, table: &str, event_kind: Option<EventKind>) {
        let notification = ChangeNotification::new(table, event_kind);
        let mut closed = Vec::new();

        {
            let subs = self.subscribers.lock();
            for (id, sub) in subs.iter() {
                if sub.tables.iter().any(|t| t == table)
                    && sub.sender.send(notification.clone()).is_err()
                {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscribers.lock();
            for id in closed {
                if let Some(sub) = subs.remove(&id) {
                    tracing::debug!(channel = %sub.channel, "pruning closed feed subscriber");
                }
            }
        }
    }

    pub fn feed_subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    // --- Functions ---

    /// Register a privileged function. The handler receives the caller's
    /// access token and the request body.
    pub fn register_function<F>(&self, name: &str, handler: F)
    where
        F: Fn(&str, Value) -> Result<Value, EndpointError> + Send + Sync + 'static,
    {
        self.functions
            .lock()
            .insert(name.to_string(), Arc::new(handler));
    }

    // --- Internals ---

    /// Count the call, take a queued failure, and wait at the gate if any.
    async fn enter(&self, op: Operation) -> Result<(), RemoteError> {
        *self.calls.lock().entry(op).or_default() += 1;
        let failure = self.failures.lock().get_mut(&op).and_then(|q| q.pop_front());
        let gate = self.gates.lock().get(&op).cloned();

        if let Some(gate) = gate {
            gate.pass().await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn after_write(&self, table: &str, kind: EventKind) {
        if self.emit_on_write.load(Ordering::SeqCst) {
            self.emit(table, Some(kind));
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn id_matches(row: &Row, id: &str) -> bool {
    match row.get("id") {
        Some(Value::String(s)) => s == id,
        Some(other) => other.to_string() == id,
        None => false,
    }
}

#[async_trait]
impl RemoteStore for MemoryBackend {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: &[OrderBy],
    ) -> Result<Vec<Row>, RemoteError> {
        self.enter(Operation::Select).await?;

        let mut rows: Vec<Row> = self
            .tables
            .lock()
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        sort_rows(&mut rows, order);
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, RemoteError> {
        self.enter(Operation::Insert).await?;

        let id = match row.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        {
            let mut tables = self.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            if rows.iter().any(|r| id_matches(r, &id)) {
                return Err(RemoteError::rejected(format!(
                    "duplicate key value violates unique constraint on {}.id",
                    table
                )));
            }
            row.insert("id".to_string(), Value::String(id));
            rows.push(row.clone());
        }

        self.after_write(table, EventKind::Insert);
        Ok(row)
    }

    async fn update(&self, table: &str, id: &RecordId, delta: &Delta) -> Result<(), RemoteError> {
        self.enter(Operation::Update).await?;

        {
            let mut tables = self.tables.lock();
            let row = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| id_matches(r, id.as_str())))
                .ok_or_else(|| RemoteError::rejected(format!("no row {} in {}", id, table)))?;
            merge_row(row, delta);
        }

        self.after_write(table, EventKind::Update);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &RecordId) -> Result<(), RemoteError> {
        self.enter(Operation::Delete).await?;

        let removed = {
            let mut tables = self.tables.lock();
            match tables.get_mut(table) {
                Some(rows) => {
                    let before = rows.len();
                    rows.retain(|r| !id_matches(r, id.as_str()));
                    rows.len() != before
                }
                None => false,
            }
        };

        if removed {
            self.after_write(table, EventKind::Delete);
        }
        Ok(())
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe(&self, channel: &str, tables: &[String]) -> Result<FeedSubscription, RemoteError> {
        let id = FeedSubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(
            id,
            FeedSubscriber {
                channel: channel.to_string(),
                tables: tables.to_vec(),
                sender,
            },
        );
        Ok(FeedSubscription { id, receiver })
    }

    fn unsubscribe(&self, id: FeedSubscriptionId) {
        self.subscribers.lock().remove(&id);
    }
}

#[async_trait]
impl PrivilegedEndpoint for MemoryBackend {
    async fn invoke(
        &self,
        function: &str,
        access_token: &str,
        body: Value,
    ) -> Result<Value, EndpointError> {
        let handler = self.functions.lock().get(function).cloned();
        match handler {
            Some(handler) => handler(access_token, body),
            None => Err(EndpointError::new(404, format!("function {} not found", function))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(v: Value) -> Delta {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_crud_round() {
        let backend = MemoryBackend::new();
        backend.seed("kpis", vec![json!({"id": "1", "current": 87, "department_id": "ops"})]);

        let row = backend
            .insert("kpis", delta(json!({"current": 10, "department_id": "hr"})))
            .await
            .unwrap();
        let new_id = RecordId::from(row["id"].as_str().unwrap());

        backend
            .update("kpis", &RecordId::from("1"), &delta(json!({"current": 92})))
            .await
            .unwrap();

        let ops = backend
            .select("kpis", &Filter::all().eq("department_id", "ops"), &[])
            .await
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0]["current"], json!(92));

        backend.delete("kpis", &new_id).await.unwrap();
        assert_eq!(backend.rows("kpis").len(), 1);
        assert_eq!(backend.calls(Operation::Select), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_rejected() {
        let backend = MemoryBackend::new();
        let err = backend
            .update("kpis", &RecordId::from("nope"), &delta(json!({"current": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::RemoteErrorKind::Rejected);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::Select, RemoteError::network("offline"));

        assert!(backend.select("kpis", &Filter::all(), &[]).await.is_err());
        assert!(backend.select("kpis", &Filter::all(), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_writes_notify_matching_subscribers() {
        let backend = MemoryBackend::new();
        let mut kpis = backend.subscribe("kpis-changes", &["kpis".to_string()]).unwrap();
        let mut okrs = backend.subscribe("okrs-changes", &["okrs".to_string()]).unwrap();

        backend.insert("kpis", delta(json!({"current": 1}))).await.unwrap();

        let n = kpis.receiver.try_recv().unwrap();
        assert_eq!(n.table, "kpis");
        assert_eq!(n.event_kind, Some(EventKind::Insert));
        assert!(okrs.receiver.try_recv().is_err());

        backend.unsubscribe(kpis.id);
        assert_eq!(backend.feed_subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_gate_holds_until_released() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("kpis", vec![json!({"id": "1"})]);
        let gate = backend.hold(Operation::Select);

        let b = Arc::clone(&backend);
        let task = tokio::spawn(async move { b.select("kpis", &Filter::all(), &[]).await });

        gate.arrived(1).await;
        assert!(!task.is_finished());

        gate.release();
        let rows = task.await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let backend = MemoryBackend::new();
        let err = backend.invoke("create-user", "token", json!({})).await.unwrap_err();
        assert_eq!(err.status, 404);
    }
}
