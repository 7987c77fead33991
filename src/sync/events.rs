//! Sync events and reload planning.
//!
//! The orchestrator reports what it did as [`SyncEvent`]s to registered handlers, so
//! logging and application hooks stay out of the sync logic. Incoming change
//! notifications go the other way: [`plan_reloads`] folds a burst of them into the set
//! of record kinds that must be re-read.

use crate::ledger::{AccountKind, Address, identify_account};
use crate::sync::subscriptions::SubscriptionTarget;
use crate::sync::tiers::ReadSource;
use crate::sync::transport::ChangeNotification;
use crate::sync::types::{SyncError, WriteOutcome};
use std::collections::BTreeSet;

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
	/// A record kind was replaced wholesale
	RecordsLoaded {
		kind: AccountKind,
		source: ReadSource,
		count: usize,
	},
	/// A write finished validation and produced an outcome
	WriteCompleted {
		operation: &'static str,
		outcome: WriteOutcome,
	},
	/// The connected identity changed
	IdentityChanged { address: Option<Address> },
	/// Push notifications were coalesced into reloads
	NotificationsReceived { count: usize, kinds: Vec<AccountKind> },
	RealtimeEnabled,
	RealtimeDisabled,
	/// The transport dropped a real-time subscription
	RealtimeLost { reason: String },
	/// All user data was dropped after the identity disconnected
	Cleared,
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
	async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

	/// Name used in diagnostics.
	fn name(&self) -> &'static str;
}

/// Fans events out to every registered handler.
#[derive(Default)]
pub struct EventDispatcher {
	handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Handlers are called in registration order.
	pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
		self.handlers.push(handler);
	}

	pub fn handler_count(&self) -> usize {
		self.handlers.len()
	}

	/// Errors from one handler are logged and do not stop the others.
	pub async fn dispatch(&mut self, event: &SyncEvent) {
		for handler in &mut self.handlers {
			if let Err(e) = handler.handle(event).await {
				tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
			}
		}
	}
}

/// Logs every event at info level
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
	async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
		match event {
			SyncEvent::RecordsLoaded {
				kind,
				source,
				count,
			} => tracing::info!("{} {} loaded from {}", count, kind.collection(), source),
			SyncEvent::WriteCompleted { operation, outcome } => {
				tracing::info!("{}: {:?}", operation, outcome)
			}
			SyncEvent::IdentityChanged { address: Some(a) } => {
				tracing::info!("Identity connected: {}", a)
			}
			SyncEvent::IdentityChanged { address: None } => {
				tracing::info!("Identity disconnected")
			}
			SyncEvent::NotificationsReceived { count, kinds } => {
				tracing::info!("{} notifications, reloading {:?}", count, kinds)
			}
			SyncEvent::RealtimeEnabled => tracing::info!("Real-time updates enabled"),
			SyncEvent::RealtimeDisabled => tracing::info!("Real-time updates disabled"),
			SyncEvent::RealtimeLost { reason } => {
				tracing::warn!("Real-time updates interrupted: {}", reason)
			}
			SyncEvent::Cleared => tracing::info!("User data cleared"),
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"logging"
	}
}

/// Record kinds to re-read after a burst of notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadPlan {
	kinds: BTreeSet<AccountKind>,
}

impl ReloadPlan {
	pub fn all() -> Self {
		Self {
			kinds: AccountKind::ALL.into_iter().collect(),
		}
	}

	pub fn add(&mut self, kind: AccountKind) {
		self.kinds.insert(kind);
	}

	pub fn contains(&self, kind: AccountKind) -> bool {
		self.kinds.contains(&kind)
	}

	pub fn is_empty(&self) -> bool {
		self.kinds.is_empty()
	}

	pub fn kinds(&self) -> impl Iterator<Item = AccountKind> + '_ {
		self.kinds.iter().copied()
	}
}

/// Coalesce notifications: each affected kind is reloaded once.
///
/// The kind comes from the discriminator in the notification data. Notifications that
/// cannot be attributed (no data, unknown discriminator) reload everything.
pub fn plan_reloads(
	notifications: &[ChangeNotification],
	own_profile: Option<&Address>,
) -> ReloadPlan {
	let mut plan = ReloadPlan::default();
	for notification in notifications {
		if let SubscriptionTarget::Account(address) = notification.target {
			if Some(&address) == own_profile {
				plan.add(AccountKind::UserProfile);
				continue;
			}
		}
		match notification.data.as_deref().map(identify_account) {
			Some(Ok(kind)) => plan.add(kind),
			_ => return ReloadPlan::all(),
		}
	}
	plan
}
