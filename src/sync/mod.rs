//! Keeping a local view of the ledger's records current.
//!
//! The [`SyncOrchestrator`] ties the services together: tiered reads through
//! [`tiers`], durable snapshots in [`cache`], push notifications through
//! [`subscriptions`], and the [`LedgerTransport`] seam to the network.

pub mod cache;
pub mod events;
pub mod observable;
pub mod orchestrator;
pub mod repositories;
pub mod seed;
pub mod state;
pub mod subscriptions;
pub mod tiers;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{LocalCache, cache_key};
pub use events::{EventDispatcher, LoggingEventHandler, ReloadPlan, SyncEvent, SyncEventHandler};
pub use observable::{ListenerId, Observable};
pub use orchestrator::{IdentityReceiver, SyncOrchestrator};
pub use repositories::{CacheError, CacheStore, FileCacheStore, MemoryCacheStore};
pub use state::RecordSet;
pub use subscriptions::{SubscriptionHandle, SubscriptionManager, SubscriptionState, SubscriptionTarget};
pub use tiers::{ReadSource, TieredRead};
pub use transport::{
	AccountFilter, ChangeNotification, Confirmation, KeyedAccount, LedgerTransport,
	NotificationSink, SinkEvent, TransportError, TransportSubscriptionId,
};
pub use types::{SyncError, WriteOutcome};
