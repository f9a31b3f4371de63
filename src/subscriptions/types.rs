//! Event types for the collection side channel.

use crate::error::{MutationKind, SyncError};
use crate::types::{CollectionStatus, RecordId};

/// Configuration for an event subscription.
#[derive(Clone, Debug)]
pub struct EventConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 256
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: EventFilter::default(),
        }
    }
}

impl EventConfig {
    pub fn with_filter(filter: EventFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Filter criteria for event subscriptions.
#[derive(Clone, Debug)]
pub struct EventFilter {
    /// Status transitions.
    pub include_status: bool,

    /// Successful loads.
    pub include_loads: bool,

    /// Confirmations of optimistic mutations.
    pub include_confirmations: bool,

    /// User-initiated failures (failed loads, rolled-back mutations).
    pub include_failures: bool,

    /// Failures of refetches triggered by the change feed.
    pub include_background_failures: bool,
}

impl Default for EventFilter {
    /// What a UI toast layer wants: user-visible failures only.
    fn default() -> Self {
        Self::failures()
    }
}

impl EventFilter {
    pub fn failures() -> Self {
        Self {
            include_status: false,
            include_loads: false,
            include_confirmations: false,
            include_failures: true,
            include_background_failures: false,
        }
    }

    pub fn all() -> Self {
        Self {
            include_status: true,
            include_loads: true,
            include_confirmations: true,
            include_failures: true,
            include_background_failures: true,
        }
    }

    pub(crate) fn accepts(&self, event: &SyncEvent) -> bool {
        match event {
            SyncEvent::StatusChanged { .. } => self.include_status,
            SyncEvent::Loaded { .. } => self.include_loads,
            SyncEvent::Confirmed { .. } => self.include_confirmations,
            SyncEvent::RolledBack { .. } => self.include_failures,
            SyncEvent::Failed { origin, .. } => match origin {
                EventOrigin::User => self.include_failures,
                EventOrigin::Background => self.include_background_failures,
            },
            SyncEvent::Dropped { .. } => true,
        }
    }
}

/// Who started the operation that produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOrigin {
    /// A direct call on the collection.
    User,
    /// A refetch triggered by the change feed.
    Background,
}

/// Events emitted on the side channel.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// Collection moved to a new lifecycle state.
    StatusChanged {
        table: String,
        status: CollectionStatus,
    },

    /// A load replaced the server base.
    Loaded {
        table: String,
        count: usize,
        version: u64,
    },

    /// An optimistic mutation was accepted by the server.
    Confirmed {
        table: String,
        kind: MutationKind,
        id: RecordId,
    },

    /// An optimistic mutation was rejected and undone.
    RolledBack {
        table: String,
        kind: MutationKind,
        id: RecordId,
        error: SyncError,
    },

    /// A load failed; the previous snapshot is kept.
    Failed {
        table: String,
        origin: EventOrigin,
        error: SyncError,
    },

    /// This subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why an event subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The collection was closed.
    Closed,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for an event subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventSubscriptionId(pub u64);

/// Handle to receive side-channel events.
pub struct EventHandle {
    pub id: EventSubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<SyncEvent>,
}

impl EventHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SyncEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SyncEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SyncEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<SyncEvent> {
        self.receiver.try_iter().collect()
    }
}
