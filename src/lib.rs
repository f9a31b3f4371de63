//! # Synchronized Collections
//!
//! Observable local copies of tables in a hosted relational backend, kept
//! consistent under optimistic local writes and realtime change
//! notifications.
//!
//! ## Core Concepts
//!
//! - **Collections**: One table (plus filter, order, child relations) mirrored
//!   in memory as an immutable, cheaply cloned snapshot
//! - **Optimistic mutations**: Writes show up immediately and are undone
//!   exactly if the server rejects them
//! - **Refetch on signal**: Change notifications carry no rows, so any
//!   relevant one triggers a full reload with the last-used filter
//! - **Registry**: One reference-counted instance per table and filter,
//!   closed when the last view lets go
//!
//! ## Example
//!
//! ```ignore
//! use opsboard_sync::{CollectionRegistry, MemoryBackend, schemas::Kpi};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let registry = CollectionRegistry::new(backend.clone()).with_change_feed(backend);
//!
//! let kpis = registry.acquire::<Kpi>(Kpi::collection(Some("ops"))).await?;
//! let unsubscribe = kpis.subscribe(|| println!("kpis changed"))?;
//!
//! let mut delta = Delta::new();
//! delta.insert("current".into(), json!(92));
//! kpis.update(&id, delta).await?;
//! ```

pub mod admin;
pub mod backend;
pub mod collection;
pub mod error;
pub mod patch;
pub mod query;
pub mod registry;
pub mod remote;
pub mod schemas;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use admin::{AdminClient, CreatedUser, NewUser, Role};
pub use backend::{Gate, MemoryBackend, Operation};
pub use collection::{
    ChangeAction, ChangeOutcome, ChangePolicy, CollectionBuilder, CollectionConfig,
    CollectionScope, RefetchOnSignal, RelationSpec, SyncedCollection,
};
pub use error::{
    MutationKind, RemoteError, RemoteErrorKind, Result, SyncError, ValidationError,
};
pub use patch::{apply_delta, Delta};
pub use query::{Filter, OrderBy, Predicate};
pub use registry::{CollectionLease, CollectionRegistry};
pub use remote::{
    ChangeFeed, EndpointError, FeedSubscription, FeedSubscriptionId, PrivilegedEndpoint,
    RemoteStore,
};
pub use subscriptions::{
    DropReason, EventConfig, EventFilter, EventHandle, EventOrigin, SyncEvent, Unsubscribe,
};
pub use types::*;
