//! Server base plus pending optimistic mutations.
//!
//! The visible snapshot is never edited directly. It is recomputed as
//! `fold(pending, base)` after every change, so rolling back a mutation is
//! just dropping it from the queue, and a refetch that lands while writes
//! are in flight keeps those writes visible on top of the new base.

use crate::patch::{apply_delta, to_row, Delta};
use crate::query::{compare_rows, Filter, OrderBy};
use crate::types::{CollectionStatus, MutationId, Record, RecordId, Snapshot};
use std::cmp::Ordering;
use std::sync::Arc;

/// A queued local change.
#[derive(Clone, Debug)]
pub(crate) enum PendingOp<R> {
    Create { record: R },
    Update { id: RecordId, delta: Delta },
    Delete { id: RecordId },
}

#[derive(Clone, Debug)]
pub(crate) struct PendingMutation<R> {
    pub id: MutationId,
    pub op: PendingOp<R>,
}

/// Outcome of applying a load response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    Applied,
    /// A response to a later request was already applied.
    Stale,
}

pub(crate) struct CollectionState<R> {
    base: Vec<R>,
    pending: Vec<PendingMutation<R>>,
    visible: Arc<Vec<R>>,
    order: Vec<OrderBy>,
    status: CollectionStatus,
    version: u64,
    next_mutation: u64,

    /// Filter used by the most recent load; refetches reuse it.
    pub(crate) last_filter: Filter,
    load_issued: u64,
    load_applied: u64,

    /// A feed-triggered refetch is running.
    pub(crate) refetching: bool,
    /// Another notification arrived while refetching.
    pub(crate) refetch_dirty: bool,
}

impl<R: Record> CollectionState<R> {
    pub(crate) fn new(filter: Filter, order: Vec<OrderBy>) -> Self {
        Self {
            base: Vec::new(),
            pending: Vec::new(),
            visible: Arc::new(Vec::new()),
            order,
            status: CollectionStatus::Uninitialized,
            version: 0,
            next_mutation: 1,
            last_filter: filter,
            load_issued: 0,
            load_applied: 0,
            refetching: false,
            refetch_dirty: false,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<R> {
        Snapshot {
            records: Arc::clone(&self.visible),
            status: self.status,
            version: self.version,
            pending: self.pending.len(),
        }
    }

    pub(crate) fn status(&self) -> CollectionStatus {
        self.status
    }

    /// Returns true if the status actually changed.
    pub(crate) fn set_status(&mut self, status: CollectionStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.version += 1;
        true
    }

    pub(crate) fn visible(&self, id: &RecordId) -> Option<&R> {
        self.visible.iter().find(|r| r.id() == id)
    }

    // --- Loads ---

    /// Register a new load request and return its sequence number.
    pub(crate) fn begin_load(&mut self, filter: Filter) -> u64 {
        self.last_filter = filter;
        self.load_issued += 1;
        self.set_status(CollectionStatus::Loading);
        self.load_issued
    }

    pub(crate) fn apply_load(&mut self, seq: u64, records: Vec<R>) -> LoadOutcome {
        if seq < self.load_applied {
            return LoadOutcome::Stale;
        }
        self.load_applied = seq;
        self.base = records;
        self.status = CollectionStatus::Ready;
        self.recompute();
        LoadOutcome::Applied
    }

    /// Returns true if the failure changed the status.
    pub(crate) fn fail_load(&mut self, seq: u64) -> bool {
        if seq < self.load_applied {
            return false;
        }
        self.set_status(CollectionStatus::Errored)
    }

    // --- Mutations ---

    pub(crate) fn push(&mut self, op: PendingOp<R>) -> MutationId {
        let id = MutationId(self.next_mutation);
        self.next_mutation += 1;
        self.pending.push(PendingMutation { id, op });
        self.recompute();
        id
    }

    fn take(&mut self, id: MutationId) -> Option<PendingOp<R>> {
        let pos = self.pending.iter().position(|m| m.id == id)?;
        Some(self.pending.remove(pos).op)
    }

    /// Drop a mutation without touching the base.
    pub(crate) fn rollback(&mut self, id: MutationId) -> bool {
        let found = self.take(id).is_some();
        if found {
            self.recompute();
        }
        found
    }

    /// Fold a server-confirmed mutation into the base.
    pub(crate) fn confirm(&mut self, id: MutationId, created: Option<R>) -> bool {
        let Some(op) = self.take(id) else {
            return false;
        };

        match op {
            PendingOp::Create { .. } => {
                if let Some(record) = created {
                    // A refetch may already have delivered it.
                    if !self.base.iter().any(|r| r.id() == record.id()) {
                        self.base.push(record);
                    }
                }
            }
            PendingOp::Update { id, delta } => {
                if let Some(slot) = self.base.iter_mut().find(|r| r.id() == &id) {
                    match apply_delta(slot, &delta) {
                        Ok(patched) => *slot = patched,
                        Err(e) => tracing::warn!(id = %id, error = %e, "confirmed delta no longer applies"),
                    }
                }
            }
            PendingOp::Delete { id } => {
                self.base.retain(|r| r.id() != &id);
            }
        }

        self.recompute();
        true
    }

    /// Rebuild the visible snapshot from base and pending.
    fn recompute(&mut self) {
        let mut working = self.base.clone();

        for mutation in &self.pending {
            match &mutation.op {
                PendingOp::Create { record } => {
                    if !working.iter().any(|r| r.id() == record.id()) {
                        working.push(record.clone());
                    }
                }
                PendingOp::Update { id, delta } => {
                    if let Some(slot) = working.iter_mut().find(|r| r.id() == id) {
                        match apply_delta(slot, delta) {
                            Ok(patched) => *slot = patched,
                            Err(e) => tracing::debug!(
                                mutation = %mutation.id,
                                error = %e,
                                "skipping pending update"
                            ),
                        }
                    }
                }
                PendingOp::Delete { id } => working.retain(|r| r.id() != id),
            }
        }

        sort_records(&mut working, &self.order);
        self.visible = Arc::new(working);
        self.version += 1;
    }
}

/// Stable sort by the collection's order. Records that fail to serialize
/// keep their relative position.
fn sort_records<R: Record>(records: &mut Vec<R>, order: &[OrderBy]) {
    if order.is_empty() || records.len() < 2 {
        return;
    }

    let mut keyed: Vec<_> = records
        .drain(..)
        .map(|r| (to_row(&r).ok(), r))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => compare_rows(a, b, order),
        _ => Ordering::Equal,
    });

    records.extend(keyed.into_iter().map(|(_, r)| r));
}
