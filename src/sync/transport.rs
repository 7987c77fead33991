//! The boundary to the remote ledger.
//!
//! Everything the sync layer needs from the network goes through [`LedgerTransport`], so
//! the orchestrator can run against the JSON-RPC client or an in-process double.

use crate::ledger::{AccountKind, Address, Identity, Instruction};
use crate::sync::subscriptions::{SubscriptionHandle, SubscriptionTarget};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error("Network error: {0}")]
	Network(String),

	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("Invalid response: {0}")]
	InvalidResponse(String),

	#[error("Transaction rejected: {0}")]
	Rejected(String),

	#[error("Timed out waiting for {0}")]
	Timeout(String),

	#[error("Subscription error: {0}")]
	Subscription(String),

	#[error("Signing error: {0}")]
	Signing(String),
}

/// Raw account data together with its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedAccount {
	pub address: Address,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
	/// Byte-prefix match of `bytes` at `offset` into the account data.
	Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
	/// Select accounts of one record kind by their leading discriminator.
	pub fn discriminator(kind: AccountKind) -> Self {
		AccountFilter::Memcmp {
			offset: 0,
			bytes: kind.discriminator().to_vec(),
		}
	}

	pub fn matches(&self, data: &[u8]) -> bool {
		match self {
			AccountFilter::Memcmp { offset, bytes } => data
				.get(*offset..offset.saturating_add(bytes.len()))
				.is_some_and(|window| window == bytes.as_slice()),
		}
	}
}

/// Proof that a submission landed at the configured commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
	pub signature: String,
	pub slot: Option<u64>,
}

/// Identifier the transport assigned to a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportSubscriptionId(pub u64);

/// A push notification: something changed at `address`; re-fetch before trusting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
	pub handle: SubscriptionHandle,
	pub target: SubscriptionTarget,
	pub address: Address,
	pub data: Option<Vec<u8>>,
}

/// What a transport pushes to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
	Changed(ChangeNotification),
	/// The transport lost the subscription; nothing more arrives for `handle`.
	Closed {
		handle: SubscriptionHandle,
		target: SubscriptionTarget,
		reason: String,
	},
}

/// Where a transport delivers notifications for one subscription.
#[derive(Debug, Clone)]
pub struct NotificationSink {
	handle: SubscriptionHandle,
	target: SubscriptionTarget,
	sender: UnboundedSender<SinkEvent>,
}

impl NotificationSink {
	pub fn new(
		handle: SubscriptionHandle,
		target: SubscriptionTarget,
		sender: UnboundedSender<SinkEvent>,
	) -> Self {
		Self {
			handle,
			target,
			sender,
		}
	}

	pub fn handle(&self) -> SubscriptionHandle {
		self.handle
	}

	pub fn target(&self) -> SubscriptionTarget {
		self.target
	}

	/// Returns false once the receiving side is gone.
	pub fn notify(&self, address: Address, data: Option<Vec<u8>>) -> bool {
		self.sender
			.send(SinkEvent::Changed(ChangeNotification {
				handle: self.handle,
				target: self.target,
				address,
				data,
			}))
			.is_ok()
	}

	/// Report that the subscription ended on the transport side.
	pub fn close(&self, reason: impl Into<String>) -> bool {
		self.sender
			.send(SinkEvent::Closed {
				handle: self.handle,
				target: self.target,
				reason: reason.into(),
			})
			.is_ok()
	}
}

#[async_trait::async_trait]
pub trait LedgerTransport: Send + Sync {
	/// Raw account data, or `None` when nothing is stored at `address`.
	async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>, TransportError>;

	async fn get_program_accounts(
		&self,
		program_id: &Address,
		filter: Option<AccountFilter>,
	) -> Result<Vec<KeyedAccount>, TransportError>;

	/// Submit `instructions` as one atomic transaction and wait for confirmation.
	async fn submit(
		&self,
		instructions: &[Instruction],
		signer: &dyn Identity,
	) -> Result<Confirmation, TransportError>;

	async fn subscribe_account(
		&self,
		address: &Address,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, TransportError>;

	async fn subscribe_program(
		&self,
		program_id: &Address,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, TransportError>;

	async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError>;
}
