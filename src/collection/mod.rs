//! Synchronized collections.
//!
//! A [`SyncedCollection`] keeps an observable local copy of one remote table
//! (optionally filtered and with child relations attached) consistent with
//! the server:
//! - Local writes apply immediately and are undone if the server rejects them
//! - Change-feed notifications trigger a refetch with the last-used filter
//! - Late responses for a closed instance are discarded
//!
//! # Example
//!
//! ```ignore
//! let kpis: SyncedCollection<Kpi> = SyncedCollection::builder(
//!     CollectionConfig::new("kpis").with_filter(Filter::all().eq("department_id", dept)),
//!     remote,
//! )
//! .change_feed(feed)
//! .open()?;
//!
//! kpis.load(kpis.filter()).await?;
//! kpis.update(&id, delta).await?;
//! ```

mod policy;
mod relations;
mod state;
mod store;

pub use policy::{ChangeAction, ChangePolicy, CollectionScope, RefetchOnSignal};
pub use relations::RelationSpec;
pub use store::{ChangeOutcome, CollectionBuilder, CollectionConfig, SyncedCollection};
