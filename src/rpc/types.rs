//! Types for the ledger's JSON-RPC and websocket pub/sub APIs

use crate::ledger::{Address, TransactionError};
use crate::sync::TransportError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JSON-RPC code for a transaction that failed preflight simulation.
pub const SIMULATION_FAILED: i64 = -32002;

/// How final a ledger state must be before it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
	Processed,
	Confirmed,
	Finalized,
}

impl Commitment {
	pub fn as_str(&self) -> &'static str {
		match self {
			Commitment::Processed => "processed",
			Commitment::Confirmed => "confirmed",
			Commitment::Finalized => "finalized",
		}
	}
}

impl fmt::Display for Commitment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Commitment {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"processed" => Ok(Commitment::Processed),
			"confirmed" => Ok(Commitment::Confirmed),
			"finalized" => Ok(Commitment::Finalized),
			other => Err(format!("unknown commitment level: {}", other)),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
	pub result: Option<T>,
	pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
	pub code: i64,
	pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcContext {
	pub slot: u64,
}

/// A result wrapped with the slot it was read at.
#[derive(Debug, Clone, Deserialize)]
pub struct WithContext<T> {
	pub context: RpcContext,
	pub value: T,
}

/// Account as returned with `"encoding": "base64"`.
#[derive(Debug, Clone, Deserialize)]
pub struct UiAccount {
	/// `[payload, encoding]`
	pub data: (String, String),
	pub owner: String,
	pub lamports: u64,
}

impl UiAccount {
	pub fn decode_data(&self) -> Result<Vec<u8>, RpcError> {
		let (payload, encoding) = &self.data;
		if encoding != "base64" {
			return Err(RpcError::InvalidResponse(format!(
				"unexpected account encoding {}",
				encoding
			)));
		}
		STANDARD
			.decode(payload)
			.map_err(|e| RpcError::InvalidResponse(format!("invalid base64 account data: {}", e)))
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramAccount {
	pub pubkey: String,
	pub account: UiAccount,
}

impl ProgramAccount {
	pub fn address(&self) -> Result<Address, RpcError> {
		self.pubkey
			.parse()
			.map_err(|e| RpcError::InvalidResponse(format!("invalid pubkey {}: {}", self.pubkey, e)))
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
	pub blockhash: String,
	pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
	pub slot: u64,
	pub confirmations: Option<u64>,
	pub err: Option<serde_json::Value>,
	pub confirmation_status: Option<Commitment>,
}

impl SignatureStatus {
	/// Whether the transaction is at least as final as `commitment`.
	pub fn reached(&self, commitment: Commitment) -> bool {
		self.confirmation_status
			.is_some_and(|status| status >= commitment)
	}
}

/// A websocket push message.
#[derive(Debug, Deserialize)]
pub struct Notification {
	pub method: Option<String>,
	pub params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
	pub result: serde_json::Value,
	pub subscription: u64,
}

/// Error types for RPC and websocket operations
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("No result returned")]
	NoResult,

	#[error("Invalid response: {0}")]
	InvalidResponse(String),

	#[error("Transaction {signature} failed: {reason}")]
	TransactionFailed { signature: String, reason: String },

	#[error("Timed out waiting for {0}")]
	Timeout(String),

	#[error("Subscription error: {0}")]
	Subscription(String),

	#[error(transparent)]
	Transaction(#[from] TransactionError),
}

impl From<RpcError> for TransportError {
	fn from(e: RpcError) -> Self {
		match e {
			RpcError::Http(e) => TransportError::Network(e.to_string()),
			RpcError::WebSocket(e) => TransportError::Network(e.to_string()),
			RpcError::Rpc {
				code: SIMULATION_FAILED,
				message,
			} => TransportError::Rejected(message),
			RpcError::Rpc { code, message } => TransportError::Rpc { code, message },
			RpcError::TransactionFailed { .. } => TransportError::Rejected(e.to_string()),
			RpcError::Timeout(what) => TransportError::Timeout(what),
			RpcError::Subscription(reason) => TransportError::Subscription(reason),
			RpcError::Transaction(
				TransactionError::Signing(_) | TransactionError::MissingSigner(_),
			) => TransportError::Signing(e.to_string()),
			RpcError::Transaction(e) => TransportError::Rejected(e.to_string()),
			RpcError::Json(_) | RpcError::NoResult | RpcError::InvalidResponse(_) => {
				TransportError::InvalidResponse(e.to_string())
			}
		}
	}
}
