//! Interfaces to the hosted backend.
//!
//! The crate never talks to a network itself. Applications inject
//! implementations of these traits (a REST client, a websocket feed, or the
//! in-memory [`MemoryBackend`](crate::backend::MemoryBackend)).

use crate::error::RemoteError;
use crate::patch::Delta;
use crate::query::{Filter, OrderBy};
use crate::types::{ChangeNotification, RecordId, Row};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// Request/response CRUD against named tables.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: &[OrderBy],
    ) -> Result<Vec<Row>, RemoteError>;

    /// Insert a row and return it as stored (with the server-assigned id).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, RemoteError>;

    async fn update(&self, table: &str, id: &RecordId, delta: &Delta) -> Result<(), RemoteError>;

    async fn delete(&self, table: &str, id: &RecordId) -> Result<(), RemoteError>;
}

/// Identifier of a feed subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedSubscriptionId(pub u64);

/// Live channel of change notifications.
pub struct FeedSubscription {
    pub id: FeedSubscriptionId,
    pub receiver: UnboundedReceiver<ChangeNotification>,
}

/// Realtime "something changed" feed.
///
/// Delivery is at-least-once and unordered across tables.
pub trait ChangeFeed: Send + Sync {
    /// Listen on `channel` for changes to any of `tables`.
    fn subscribe(&self, channel: &str, tables: &[String]) -> Result<FeedSubscription, RemoteError>;

    fn unsubscribe(&self, id: FeedSubscriptionId);
}

/// Structured failure returned by a privileged function.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("function returned {status}: {message}")]
pub struct EndpointError {
    pub status: u16,
    pub message: String,
}

impl EndpointError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 401 and 403 mean the caller lacks the privilege.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// Serverless function executed with elevated credentials after the
/// caller's own privilege is re-verified server-side.
#[async_trait]
pub trait PrivilegedEndpoint: Send + Sync {
    async fn invoke(
        &self,
        function: &str,
        access_token: &str,
        body: Value,
    ) -> Result<Value, EndpointError>;
}
