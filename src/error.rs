//! Error types for synchronized collections.

use crate::types::RecordId;
use thiserror::Error;

/// Category of a failure reported by a remote backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Transport failure (timeout, connection reset, offline).
    Network,
    /// Row-level security or missing grant.
    Permission,
    /// The backend refused the write (constraint, trigger, unknown id).
    Rejected,
    /// The request or the returned rows could not be interpreted.
    Malformed,
}

/// Error returned by [`RemoteStore`](crate::remote::RemoteStore) implementations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permission, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Malformed, message)
    }
}

/// A payload failed shape or range checks before being sent anywhere.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Which remote write a [`SyncError::Mutation`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Create => f.write_str("create"),
            MutationKind::Update => f.write_str("update"),
            MutationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Main error type for collection operations.
#[derive(Clone, Debug, Error)]
pub enum SyncError {
    #[error("Could not load {table}: {source}")]
    Fetch {
        table: String,
        #[source]
        source: RemoteError,
    },

    #[error("Could not {kind} record {id} in {table}: {source}")]
    Mutation {
        table: String,
        kind: MutationKind,
        id: RecordId,
        #[source]
        source: RemoteError,
    },

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Record {0} is still being created")]
    PendingCreate(RecordId),

    #[error("Collection {0} is closed")]
    Closed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No async runtime: {0}")]
    Runtime(String),
}

impl SyncError {
    /// True for failures that came back from the remote tier.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Fetch { .. } | SyncError::Mutation { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = SyncError::Mutation {
            table: "kpis".into(),
            kind: MutationKind::Update,
            id: RecordId::from("1"),
            source: RemoteError::network("connection reset"),
        };
        assert_eq!(
            err.to_string(),
            "Could not update record 1 in kpis: Network: connection reset"
        );
        assert!(err.is_remote());

        let err: SyncError = ValidationError::new("target", "must be positive").into();
        assert_eq!(err.to_string(), "Validation failed: invalid target: must be positive");
        assert!(!err.is_remote());
    }
}
