//! Tiered reads: remote ledger, then the local cache, then seed data.

use crate::ledger::{AccountRecord, Address, Keyed, decode_account};
use crate::sync::cache::LocalCache;
use crate::sync::transport::{AccountFilter, KeyedAccount, LedgerTransport, TransportError};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Where a record set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
	Remote,
	Cache,
	Seed,
}

impl fmt::Display for ReadSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ReadSource::Remote => "ledger",
			ReadSource::Cache => "cache",
			ReadSource::Seed => "seed data",
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TieredRead<T> {
	pub records: Vec<Keyed<T>>,
	pub source: ReadSource,
}

/// Decode every account as `T`, skipping (and logging) the ones that cannot be used.
pub fn decode_batch<T: AccountRecord>(accounts: Vec<KeyedAccount>) -> Vec<Keyed<T>> {
	let total = accounts.len();
	let decoded: Vec<Keyed<T>> = accounts
		.into_iter()
		.filter_map(|account| match decode_account::<T>(&account.data) {
			Ok(Some(record)) => Some(Keyed::new(account.address, record)),
			Ok(None) => {
				debug!("Skipping uninitialized account {}", account.address);
				None
			}
			Err(e) => {
				warn!(
					"Skipping {} account {}: {}",
					T::KIND,
					account.address,
					e
				);
				None
			}
		})
		.collect();
	if decoded.len() != total {
		debug!(
			"Decoded {} of {} {} accounts",
			decoded.len(),
			total,
			T::KIND.collection()
		);
	}
	decoded
}

/// All decodable `T` records owned by `program_id`.
pub async fn fetch_remote<T: AccountRecord>(
	transport: &dyn LedgerTransport,
	program_id: &Address,
) -> Result<Vec<Keyed<T>>, TransportError> {
	let accounts = transport
		.get_program_accounts(program_id, Some(AccountFilter::discriminator(T::KIND)))
		.await?;
	Ok(decode_batch(accounts))
}

/// Read `T` records through the fallback chain. Never fails.
///
/// A non-empty remote result is persisted as the new cache snapshot. An empty or failed
/// remote read falls back to the cache, and to `seed` when there is no snapshot.
pub async fn read_through<T: AccountRecord>(
	transport: &dyn LedgerTransport,
	program_id: &Address,
	cache: &LocalCache,
	seed: impl FnOnce() -> Vec<Keyed<T>>,
) -> TieredRead<T> {
	match fetch_remote::<T>(transport, program_id).await {
		Ok(records) if !records.is_empty() => {
			info!("Loaded {} {} from the ledger", records.len(), T::KIND.collection());
			if let Err(e) = cache.save(&records).await {
				warn!("Failed to cache {}: {}", T::KIND.collection(), e);
			}
			return TieredRead {
				records,
				source: ReadSource::Remote,
			};
		}
		Ok(_) => info!("No {} on the ledger, trying cache", T::KIND.collection()),
		Err(e) => warn!(
			"Ledger read of {} failed, trying cache: {}",
			T::KIND.collection(),
			e
		),
	}

	if let Some(records) = cache.load::<T>().await {
		info!("Loaded {} {} from cache", records.len(), T::KIND.collection());
		return TieredRead {
			records,
			source: ReadSource::Cache,
		};
	}

	let records = seed();
	info!("Using {} seed {}", records.len(), T::KIND.collection());
	TieredRead {
		records,
		source: ReadSource::Seed,
	}
}
