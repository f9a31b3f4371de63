//! Notification plumbing for synchronized collections.
//!
//! Two independent channels leave a collection:
//! - Snapshot listeners: payload-free callbacks run synchronously after
//!   every visible change. Consumers re-read the snapshot.
//! - The event bus: typed events (failures, rollbacks, status transitions)
//!   delivered through bounded channels, with slow-subscriber dropping.
//!
//! # Example
//!
//! ```ignore
//! let unsubscribe = kpis.subscribe(move || redraw(kpis_view.snapshot()));
//!
//! let errors = kpis.events(EventConfig::default());
//! while let Ok(event) = errors.try_recv() {
//!     if let SyncEvent::RolledBack { error, .. } = event {
//!         toast(error.to_string());
//!     }
//! }
//!
//! unsubscribe.unsubscribe();
//! ```

mod listeners;
mod manager;
mod types;

pub use listeners::{ListenerId, ListenerSet, Unsubscribe};
pub use manager::EventBus;
pub use types::{
    DropReason, EventConfig, EventFilter, EventHandle, EventOrigin, EventSubscriptionId, SyncEvent,
};
