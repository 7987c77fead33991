//! Lifecycle of push-notification subscriptions.
//!
//! Each subscription moves from `Active` to `Closed` exactly once. Several subscriptions
//! may watch the same target; they are tracked and closed independently. The most
//! recently closed entries are kept so their state can still be queried; older ones are
//! forgotten and report no state.

use crate::ledger::Address;
use crate::sync::transport::{
	LedgerTransport, NotificationSink, SinkEvent, TransportError, TransportSubscriptionId,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
	/// Changes to a single account.
	Account(Address),
	/// Changes to any account owned by a program.
	Program(Address),
}

impl fmt::Display for SubscriptionTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SubscriptionTarget::Account(address) => write!(f, "account {}", address),
			SubscriptionTarget::Program(address) => write!(f, "program {}", address),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
	Active,
	Closed,
}

#[derive(Debug)]
struct Entry {
	target: SubscriptionTarget,
	transport_id: TransportSubscriptionId,
	state: SubscriptionState,
}

/// Closed subscriptions remembered for [`SubscriptionManager::state`].
pub const CLOSED_HISTORY: usize = 16;

pub struct SubscriptionManager {
	transport: Arc<dyn LedgerTransport>,
	entries: HashMap<SubscriptionHandle, Entry>,
	closed: VecDeque<SubscriptionHandle>,
	next_handle: u64,
}

impl SubscriptionManager {
	pub fn new(transport: Arc<dyn LedgerTransport>) -> Self {
		Self {
			transport,
			entries: HashMap::new(),
			closed: VecDeque::new(),
			next_handle: 1,
		}
	}

	/// Open a subscription whose notifications are sent to `sender`.
	pub async fn subscribe(
		&mut self,
		target: SubscriptionTarget,
		sender: UnboundedSender<SinkEvent>,
	) -> Result<SubscriptionHandle, TransportError> {
		let handle = SubscriptionHandle(self.next_handle);
		self.next_handle += 1;

		let sink = NotificationSink::new(handle, target, sender);
		let transport_id = match target {
			SubscriptionTarget::Account(address) => {
				self.transport.subscribe_account(&address, sink).await?
			}
			SubscriptionTarget::Program(program_id) => {
				self.transport.subscribe_program(&program_id, sink).await?
			}
		};

		self.entries.insert(
			handle,
			Entry {
				target,
				transport_id,
				state: SubscriptionState::Active,
			},
		);
		info!("Subscribed to {} as {}", target, handle);
		Ok(handle)
	}

	/// Close one subscription. Unknown or already closed handles are ignored.
	pub async fn unsubscribe(&mut self, handle: SubscriptionHandle) {
		let Some(entry) = self.entries.get_mut(&handle) else {
			debug!("Ignoring unsubscribe of unknown handle {}", handle);
			return;
		};
		if entry.state == SubscriptionState::Closed {
			return;
		}

		// Closed locally even when the transport fails; its stream is dropped either way.
		entry.state = SubscriptionState::Closed;
		let (target, transport_id) = (entry.target, entry.transport_id);
		self.closed.push_back(handle);
		while self.closed.len() > CLOSED_HISTORY {
			if let Some(oldest) = self.closed.pop_front() {
				self.entries.remove(&oldest);
			}
		}

		if let Err(e) = self.transport.unsubscribe(transport_id).await {
			warn!("Failed to unsubscribe {} from {}: {}", handle, target, e);
		} else {
			debug!("Unsubscribed {} from {}", handle, target);
		}
	}

	/// Number of subscriptions tracked, active and remembered closed ones together.
	pub fn tracked_count(&self) -> usize {
		self.entries.len()
	}

	/// Close every active subscription. Safe to call repeatedly.
	pub async fn unsubscribe_all(&mut self) {
		let mut active: Vec<SubscriptionHandle> = self
			.entries
			.iter()
			.filter(|(_, entry)| entry.state == SubscriptionState::Active)
			.map(|(handle, _)| *handle)
			.collect();
		if active.is_empty() {
			return;
		}
		active.sort();
		info!("Closing {} subscriptions", active.len());
		for handle in active {
			self.unsubscribe(handle).await;
		}
	}

	pub fn state(&self, handle: SubscriptionHandle) -> Option<SubscriptionState> {
		self.entries.get(&handle).map(|entry| entry.state)
	}

	pub fn is_active(&self, handle: SubscriptionHandle) -> bool {
		self.state(handle) == Some(SubscriptionState::Active)
	}

	pub fn active_count(&self) -> usize {
		self.entries
			.values()
			.filter(|entry| entry.state == SubscriptionState::Active)
			.count()
	}

	pub fn is_subscribed(&self, target: &SubscriptionTarget) -> bool {
		self.entries
			.values()
			.any(|entry| entry.state == SubscriptionState::Active && &entry.target == target)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::testing::MockTransport;

	fn target(n: u8) -> SubscriptionTarget {
		SubscriptionTarget::Account(Address::new([n; 32]))
	}

	#[tokio::test]
	async fn test_subscriptions_are_independent() {
		let transport = Arc::new(MockTransport::new(Address::new([7; 32])));
		let mut manager = SubscriptionManager::new(transport.clone());
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

		let first = manager.subscribe(target(1), tx.clone()).await.expect("subscribes");
		let second = manager.subscribe(target(1), tx).await.expect("subscribes");
		assert_ne!(first, second);
		assert_eq!(manager.active_count(), 2);

		manager.unsubscribe(first).await;
		assert_eq!(manager.state(first), Some(SubscriptionState::Closed));
		assert_eq!(manager.state(second), Some(SubscriptionState::Active));
		assert!(manager.is_subscribed(&target(1)));
		assert_eq!(transport.live_subscriptions(), 1);
	}

	#[tokio::test]
	async fn test_unsubscribe_unknown_and_closed_is_noop() {
		let transport = Arc::new(MockTransport::new(Address::new([7; 32])));
		let mut manager = SubscriptionManager::new(transport.clone());
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

		manager.unsubscribe(SubscriptionHandle(99)).await;
		let handle = manager.subscribe(target(2), tx).await.expect("subscribes");
		manager.unsubscribe(handle).await;
		manager.unsubscribe(handle).await;
		assert_eq!(transport.unsubscribe_calls(), 1);
		assert_eq!(manager.state(SubscriptionHandle(99)), None);
	}

	#[tokio::test]
	async fn test_unsubscribe_all_is_idempotent() {
		let transport = Arc::new(MockTransport::new(Address::new([7; 32])));
		let mut manager = SubscriptionManager::new(transport.clone());
		manager.unsubscribe_all().await;

		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		for n in 0..3 {
			manager.subscribe(target(n), tx.clone()).await.expect("subscribes");
		}
		manager
			.subscribe(SubscriptionTarget::Program(Address::new([7; 32])), tx)
			.await
			.expect("subscribes");
		assert_eq!(manager.active_count(), 4);

		manager.unsubscribe_all().await;
		manager.unsubscribe_all().await;
		assert_eq!(manager.active_count(), 0);
		assert_eq!(transport.unsubscribe_calls(), 4);
		assert_eq!(transport.live_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_transport_unsubscribe_failure_still_closes() {
		let transport = Arc::new(MockTransport::new(Address::new([7; 32])));
		let mut manager = SubscriptionManager::new(transport.clone());
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		let handle = manager.subscribe(target(1), tx).await.expect("subscribes");

		transport.set_offline(true);
		manager.unsubscribe(handle).await;
		assert_eq!(manager.state(handle), Some(SubscriptionState::Closed));
		assert!(!manager.is_subscribed(&target(1)));
	}

	#[tokio::test]
	async fn test_closed_history_is_bounded() {
		let transport = Arc::new(MockTransport::new(Address::new([7; 32])));
		let mut manager = SubscriptionManager::new(transport);
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

		let live = manager.subscribe(target(0), tx.clone()).await.expect("subscribes");
		let mut handles = Vec::new();
		for _ in 0..CLOSED_HISTORY + 4 {
			let handle = manager.subscribe(target(1), tx.clone()).await.expect("subscribes");
			manager.unsubscribe(handle).await;
			handles.push(handle);
		}

		assert_eq!(manager.tracked_count(), CLOSED_HISTORY + 1);
		assert_eq!(manager.state(handles[0]), None);
		assert_eq!(manager.state(handles[3]), None);
		assert_eq!(manager.state(handles[4]), Some(SubscriptionState::Closed));
		assert_eq!(manager.state(live), Some(SubscriptionState::Active));

		// Forgotten handles stay closed.
		manager.unsubscribe(handles[0]).await;
		assert_eq!(manager.active_count(), 1);
	}

	#[tokio::test]
	async fn test_failed_subscribe_is_not_tracked() {
		let transport = Arc::new(MockTransport::new(Address::new([7; 32])));
		transport.set_offline(true);
		let mut manager = SubscriptionManager::new(transport);
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		assert!(manager.subscribe(target(1), tx).await.is_err());
		assert_eq!(manager.active_count(), 0);
	}
}
