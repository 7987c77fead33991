//! JSON-RPC and websocket client for the ledger

use crate::ledger::{Address, Identity, Instruction, TransactionBuilder};
use crate::rpc::types::{
	Commitment, LatestBlockhash, Notification, ProgramAccount, RpcError, RpcResponse,
	SignatureStatus, UiAccount, WithContext,
};
use crate::sync::{
	AccountFilter, Confirmation, KeyedAccount, LedgerTransport, NotificationSink, TransportError,
	TransportSubscriptionId,
};
use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Client for a ledger RPC node.
///
/// Reads and submissions go over HTTP. Every subscription gets its own websocket
/// connection served by a background task; dropping the connection ends the remote
/// subscription, so unsubscribing only has to abort the task.
#[derive(Clone)]
pub struct RpcClient {
	http_client: Client,
	rpc_url: String,
	ws_url: String,
	commitment: Commitment,
	confirmation_timeout: Duration,
	next_request_id: Arc<AtomicU64>,
	next_subscription_id: Arc<AtomicU64>,
	subscriptions: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl RpcClient {
	pub fn new(
		rpc_url: impl Into<String>,
		ws_url: impl Into<String>,
		request_timeout: Duration,
	) -> Result<Self, RpcError> {
		let http_client = Client::builder().timeout(request_timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url: rpc_url.into(),
			ws_url: ws_url.into(),
			commitment: Commitment::Confirmed,
			confirmation_timeout: Duration::from_secs(60),
			next_request_id: Arc::new(AtomicU64::new(1)),
			next_subscription_id: Arc::new(AtomicU64::new(1)),
			subscriptions: Arc::new(Mutex::new(HashMap::new())),
		})
	}

	pub fn with_commitment(mut self, commitment: Commitment) -> Self {
		self.commitment = commitment;
		self
	}

	pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
		self.confirmation_timeout = timeout;
		self
	}

	pub fn commitment(&self) -> Commitment {
		self.commitment
	}

	fn request_body(&self, method: &str, params: Value) -> Value {
		let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
		json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		})
	}

	/// Execute a JSON-RPC call
	pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
		let body = self.request_body(method, params);

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(RpcError::InvalidResponse(format!(
				"{} returned HTTP {}",
				method,
				response.status()
			)));
		}

		let response: RpcResponse<T> = response.json().await?;

		if let Some(error) = response.error {
			return Err(RpcError::Rpc {
				code: error.code,
				message: error.message,
			});
		}

		response.result.ok_or(RpcError::NoResult)
	}

	pub async fn get_account_info(&self, address: &Address) -> Result<Option<Vec<u8>>, RpcError> {
		let result: WithContext<Option<UiAccount>> = self
			.call(
				"getAccountInfo",
				json!([address.encode(), {
					"encoding": "base64",
					"commitment": self.commitment.as_str(),
				}]),
			)
			.await?;

		result.value.map(|account| account.decode_data()).transpose()
	}

	pub async fn get_program_accounts(
		&self,
		program_id: &Address,
		filter: Option<&AccountFilter>,
	) -> Result<Vec<KeyedAccount>, RpcError> {
		let accounts: Vec<ProgramAccount> = self
			.call(
				"getProgramAccounts",
				json!([program_id.encode(), program_accounts_config(self.commitment, filter)]),
			)
			.await?;

		accounts
			.iter()
			.map(|account| -> Result<KeyedAccount, RpcError> {
				Ok(KeyedAccount {
					address: account.address()?,
					data: account.account.decode_data()?,
				})
			})
			.collect()
	}

	pub async fn get_latest_blockhash(&self) -> Result<[u8; 32], RpcError> {
		let result: WithContext<LatestBlockhash> = self
			.call(
				"getLatestBlockhash",
				json!([{ "commitment": self.commitment.as_str() }]),
			)
			.await?;

		let blockhash = Address::decode(&result.value.blockhash).map_err(|e| {
			RpcError::InvalidResponse(format!("invalid blockhash {}: {}", result.value.blockhash, e))
		})?;
		Ok(blockhash.to_bytes())
	}

	/// Returns the transaction signature reported by the node.
	pub async fn send_transaction(&self, wire: &[u8]) -> Result<String, RpcError> {
		self.call(
			"sendTransaction",
			json!([STANDARD.encode(wire), {
				"encoding": "base64",
				"preflightCommitment": self.commitment.as_str(),
			}]),
		)
		.await
	}

	pub async fn get_signature_status(
		&self,
		signature: &str,
	) -> Result<Option<SignatureStatus>, RpcError> {
		let result: WithContext<Vec<Option<SignatureStatus>>> = self
			.call(
				"getSignatureStatuses",
				json!([[signature], { "searchTransactionHistory": false }]),
			)
			.await?;

		Ok(result.value.into_iter().next().flatten())
	}

	/// Poll until `signature` reaches the configured commitment; returns its slot.
	pub async fn confirm_transaction(&self, signature: &str) -> Result<u64, RpcError> {
		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(Duration::from_millis(250))
			.with_max_interval(Duration::from_secs(2))
			.with_max_elapsed_time(Some(self.confirmation_timeout))
			.build();
		let commitment = self.commitment;

		retry(policy, || async move {
			let status = self
				.get_signature_status(signature)
				.await
				.map_err(backoff::Error::transient)?;

			match status {
				Some(status) if status.err.is_some() => {
					Err(backoff::Error::permanent(RpcError::TransactionFailed {
						signature: signature.to_string(),
						reason: status.err.map(|e| e.to_string()).unwrap_or_default(),
					}))
				}
				Some(status) if status.reached(commitment) => Ok(status.slot),
				_ => Err(backoff::Error::transient(RpcError::Timeout(format!(
					"{} confirmation of {}",
					commitment, signature
				)))),
			}
		})
		.await
	}

	pub async fn submit_transaction(
		&self,
		instructions: &[Instruction],
		signer: &dyn Identity,
	) -> Result<Confirmation, RpcError> {
		let blockhash = self.get_latest_blockhash().await?;
		let transaction = TransactionBuilder::new()
			.with_fee_payer(signer.address())
			.with_recent_blockhash(blockhash)
			.with_instructions(instructions.iter().cloned())
			.build_signed(signer)?;

		let signature = self.send_transaction(&transaction.to_bytes()).await?;
		debug!(
			"Sent transaction {} with {} instruction(s)",
			signature,
			instructions.len()
		);

		let slot = self.confirm_transaction(&signature).await?;
		info!("Transaction {} confirmed at slot {}", signature, slot);

		Ok(Confirmation {
			signature,
			slot: Some(slot),
		})
	}

	/// Open a websocket, subscribe with `method`, and forward notifications to `sink`.
	async fn open_subscription(
		&self,
		method: &'static str,
		params: Value,
		account: Option<Address>,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, RpcError> {
		let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
		debug!("WebSocket connected for {}", method);

		let (mut ws_sender, mut ws_receiver) = ws_stream.split();
		let request = self.request_body(method, params);
		ws_sender.send(Message::Text(request.to_string())).await?;

		let remote_id = loop {
			match ws_receiver.next().await {
				Some(Ok(Message::Text(text))) => {
					let response: RpcResponse<u64> = serde_json::from_str(&text)?;
					if let Some(error) = response.error {
						return Err(RpcError::Rpc {
							code: error.code,
							message: error.message,
						});
					}
					break response.result.ok_or(RpcError::NoResult)?;
				}
				Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
				Some(Ok(other)) => {
					return Err(RpcError::Subscription(format!(
						"unexpected {} reply: {:?}",
						method, other
					)));
				}
				Some(Err(e)) => return Err(e.into()),
				None => {
					return Err(RpcError::Subscription(format!(
						"connection closed before {} was acknowledged",
						method
					)));
				}
			}
		};

		let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
		info!("Subscribed via {} (remote id {})", method, remote_id);

		let task = tokio::spawn(async move {
			// Held so the write half is not closed while the task reads
			let _ws_sender = ws_sender;
			forward_notifications(ws_receiver, account, &sink, remote_id).await;
		});

		self.subscriptions.lock().await.insert(id, task);
		Ok(TransportSubscriptionId(id))
	}
}

/// Forward pub/sub messages to `sink` until the stream ends.
///
/// A stream that errors, closes or ends reports the loss through the sink, so the
/// subscriber can open a new subscription. Nothing is reported once the receiving side
/// is gone.
async fn forward_notifications<S>(
	mut messages: S,
	account: Option<Address>,
	sink: &NotificationSink,
	remote_id: u64,
) where
	S: Stream<Item = Result<Message, WsError>> + Unpin,
{
	let reason = loop {
		match messages.next().await {
			Some(Ok(Message::Text(text))) => match parse_notification(&text, account) {
				Ok(Some((address, data))) => {
					if !sink.notify(address, data) {
						debug!("Notification receiver dropped, ending subscription {}", remote_id);
						return;
					}
				}
				Ok(None) => {}
				Err(e) => warn!("Ignoring malformed notification: {}", e),
			},
			Some(Ok(Message::Close(frame))) => {
				break format!("closed by the node: {:?}", frame);
			}
			Some(Ok(_)) => {}
			Some(Err(e)) => break format!("stream error: {}", e),
			None => break "connection ended".to_string(),
		}
	};

	warn!("Subscription {} lost, {}", remote_id, reason);
	sink.close(reason);
}

fn program_accounts_config(commitment: Commitment, filter: Option<&AccountFilter>) -> Value {
	let mut config = json!({
		"encoding": "base64",
		"commitment": commitment.as_str(),
	});

	if let Some(AccountFilter::Memcmp { offset, bytes }) = filter {
		config["filters"] = json!([{
			"memcmp": {
				"offset": offset,
				"bytes": bs58::encode(bytes).into_string(),
				"encoding": "base58",
			}
		}]);
	}

	config
}

/// Extract the changed address and its data from a pub/sub push message.
///
/// Account notifications do not carry their address, so the subscribed `account` is used.
/// Returns `Ok(None)` for messages that are not notifications.
pub(crate) fn parse_notification(
	text: &str,
	account: Option<Address>,
) -> Result<Option<(Address, Option<Vec<u8>>)>, RpcError> {
	let notification: Notification = serde_json::from_str(text)?;
	let Some(params) = notification.params else {
		return Ok(None);
	};

	match notification.method.as_deref() {
		Some("accountNotification") => {
			let address = account.ok_or_else(|| {
				RpcError::InvalidResponse("account notification on a program subscription".into())
			})?;
			let result: WithContext<Option<UiAccount>> = serde_json::from_value(params.result)?;
			let data = result.value.map(|a| a.decode_data()).transpose()?;
			Ok(Some((address, data)))
		}
		Some("programNotification") => {
			let result: WithContext<ProgramAccount> = serde_json::from_value(params.result)?;
			let address = result.value.address()?;
			let data = result.value.account.decode_data()?;
			Ok(Some((address, Some(data))))
		}
		_ => Ok(None),
	}
}

#[async_trait::async_trait]
impl LedgerTransport for RpcClient {
	async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>, TransportError> {
		Ok(self.get_account_info(address).await?)
	}

	async fn get_program_accounts(
		&self,
		program_id: &Address,
		filter: Option<AccountFilter>,
	) -> Result<Vec<KeyedAccount>, TransportError> {
		Ok(RpcClient::get_program_accounts(self, program_id, filter.as_ref()).await?)
	}

	async fn submit(
		&self,
		instructions: &[Instruction],
		signer: &dyn Identity,
	) -> Result<Confirmation, TransportError> {
		Ok(self.submit_transaction(instructions, signer).await?)
	}

	async fn subscribe_account(
		&self,
		address: &Address,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, TransportError> {
		let params = json!([address.encode(), {
			"encoding": "base64",
			"commitment": self.commitment.as_str(),
		}]);
		Ok(self
			.open_subscription("accountSubscribe", params, Some(*address), sink)
			.await?)
	}

	async fn subscribe_program(
		&self,
		program_id: &Address,
		sink: NotificationSink,
	) -> Result<TransportSubscriptionId, TransportError> {
		let params = json!([program_id.encode(), program_accounts_config(self.commitment, None)]);
		Ok(self
			.open_subscription("programSubscribe", params, None, sink)
			.await?)
	}

	async fn unsubscribe(&self, id: TransportSubscriptionId) -> Result<(), TransportError> {
		match self.subscriptions.lock().await.remove(&id.0) {
			Some(task) => {
				task.abort();
				debug!("Closed subscription {}", id.0);
				Ok(())
			}
			None => Err(TransportError::Subscription(format!(
				"unknown subscription {}",
				id.0
			))),
		}
	}
}
