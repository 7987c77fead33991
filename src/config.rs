//! Runtime configuration for the sync client

use crate::ledger::{Address, AddressError};
use crate::rpc::Commitment;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_WS_URL: &str = "wss://api.devnet.solana.com";
pub const DEFAULT_PROGRAM_ID: &str = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS";

const ENV_PREFIX: &str = "TRANSCENDENCE_";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
	#[error("{name} is not a valid program id: {source}")]
	InvalidProgramId {
		name: String,
		#[source]
		source: AddressError,
	},

	#[error("{name} has invalid value {value:?}: {reason}")]
	InvalidValue {
		name: String,
		value: String,
		reason: String,
	},
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
	pub rpc_url: String,
	pub ws_url: String,
	pub program_id: Address,
	pub commitment: Commitment,
	/// Directory holding cached record snapshots
	pub cache_dir: PathBuf,
	/// Keypair file, created on first run
	pub keypair_path: PathBuf,
	pub realtime: bool,
	pub request_timeout: Duration,
	pub confirmation_timeout: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			rpc_url: DEFAULT_RPC_URL.to_string(),
			ws_url: DEFAULT_WS_URL.to_string(),
			program_id: default_program_id(),
			commitment: Commitment::Confirmed,
			cache_dir: PathBuf::from("./data"),
			keypair_path: PathBuf::from("./data/keypair.json"),
			realtime: true,
			request_timeout: Duration::from_secs(30),
			confirmation_timeout: Duration::from_secs(60),
		}
	}
}

fn default_program_id() -> Address {
	DEFAULT_PROGRAM_ID.parse().unwrap_or_default()
}

impl SyncConfig {
	/// Defaults overridden by `TRANSCENDENCE_*` environment variables.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Defaults overridden by whatever `lookup` returns for each variable name.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let mut config = Self::default();
		let var = |key: &str| {
			let name = format!("{}{}", ENV_PREFIX, key);
			lookup(&name)
				.map(|value| value.trim().to_string())
				.filter(|value| !value.is_empty())
				.map(|value| (name, value))
		};

		if let Some((_, value)) = var("RPC_URL") {
			config.rpc_url = value;
		}
		if let Some((_, value)) = var("WS_URL") {
			config.ws_url = value;
		}
		if let Some((name, value)) = var("PROGRAM_ID") {
			config.program_id = value
				.parse()
				.map_err(|source| ConfigError::InvalidProgramId { name, source })?;
		}
		if let Some((name, value)) = var("COMMITMENT") {
			config.commitment = value
				.parse()
				.map_err(|reason| ConfigError::InvalidValue { name, value, reason })?;
		}
		if let Some((_, value)) = var("CACHE_DIR") {
			config.cache_dir = PathBuf::from(value);
		}
		if let Some((_, value)) = var("KEYPAIR") {
			config.keypair_path = PathBuf::from(value);
		}
		if let Some((name, value)) = var("REALTIME") {
			config.realtime = parse_bool(&name, value)?;
		}
		if let Some((name, value)) = var("REQUEST_TIMEOUT_SECS") {
			config.request_timeout = parse_secs(&name, value)?;
		}
		if let Some((name, value)) = var("CONFIRMATION_TIMEOUT_SECS") {
			config.confirmation_timeout = parse_secs(&name, value)?;
		}

		Ok(config)
	}
}

fn parse_bool(name: &str, value: String) -> Result<bool, ConfigError> {
	match value.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::InvalidValue {
			name: name.to_string(),
			value,
			reason: "expected true or false".into(),
		}),
	}
}

fn parse_secs(name: &str, value: String) -> Result<Duration, ConfigError> {
	match value.parse::<u64>() {
		Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
		_ => Err(ConfigError::InvalidValue {
			name: name.to_string(),
			value,
			reason: "expected a positive number of seconds".into(),
		}),
	}
}
