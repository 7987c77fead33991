use crate::ledger::{Address, DerivationError};
use crate::sync::transport::TransportError;

/// Failures surfaced to callers of the orchestrator.
///
/// Transport and decode problems never appear here; reads fall back and writes degrade
/// to a local update instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("No identity is connected")]
	Unauthenticated,

	#[error("Precondition failed: {0}")]
	PreconditionFailed(String),

	#[error("Address derivation failed: {0}")]
	Derivation(#[from] DerivationError),

	#[error("Subscription failed: {0}")]
	Subscription(TransportError),
}

/// Result of a write that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
	/// The ledger confirmed the transaction and the affected records were re-read.
	Confirmed { signature: String },
	/// A create targeted an address that already holds a record. Nothing was submitted.
	AlreadyExists { address: Address },
	/// Submission failed; the change exists only in the local view and cache.
	AppliedLocally { reason: String },
	/// The program would refuse this change. Nothing was submitted or changed.
	NotApplicable { reason: String },
}

impl WriteOutcome {
	/// Whether the change is now visible in the local view.
	pub fn is_success(&self) -> bool {
		matches!(
			self,
			WriteOutcome::Confirmed { .. } | WriteOutcome::AppliedLocally { .. }
		)
	}

	pub fn is_confirmed(&self) -> bool {
		matches!(self, WriteOutcome::Confirmed { .. })
	}
}
