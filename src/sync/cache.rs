//! Durable snapshots of the last known good record sets.
//!
//! One snapshot per record kind, stored under `transcendence_<collection>` as a JSON
//! envelope carrying the kind, the save time and the records. Addresses are base58 and
//! instants RFC 3339, so a snapshot is readable by hand.

use crate::ledger::{AccountKind, AccountRecord, Keyed};
use crate::sync::repositories::{CacheError, CacheStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "transcendence_";

pub fn cache_key(kind: AccountKind) -> String {
	format!("{}{}", KEY_PREFIX, kind.collection())
}

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
	kind: AccountKind,
	saved_at: DateTime<Utc>,
	records: &'a [Keyed<T>],
}

#[derive(Deserialize)]
struct Snapshot<T> {
	kind: AccountKind,
	#[allow(dead_code)]
	saved_at: DateTime<Utc>,
	records: Vec<Keyed<T>>,
}

#[derive(Clone)]
pub struct LocalCache {
	store: Arc<dyn CacheStore>,
}

impl LocalCache {
	pub fn new(store: Arc<dyn CacheStore>) -> Self {
		Self { store }
	}

	/// Replace the snapshot for `T`'s kind with `records`.
	pub async fn save<T: AccountRecord>(&self, records: &[Keyed<T>]) -> Result<(), CacheError> {
		let snapshot = SnapshotRef {
			kind: T::KIND,
			saved_at: Utc::now(),
			records,
		};
		let json = serde_json::to_string_pretty(&snapshot)?;
		self.store.set(&cache_key(T::KIND), &json).await?;
		debug!("Cached {} {}", records.len(), T::KIND.collection());
		Ok(())
	}

	pub async fn try_load<T: AccountRecord>(&self) -> Result<Option<Vec<Keyed<T>>>, CacheError> {
		let key = cache_key(T::KIND);
		let Some(content) = self.store.get(&key).await? else {
			return Ok(None);
		};
		let snapshot: Snapshot<T> = serde_json::from_str(&content)?;
		if snapshot.kind != T::KIND {
			return Err(CacheError::KindMismatch {
				key,
				found: snapshot.kind.to_string(),
			});
		}
		Ok(Some(snapshot.records))
	}

	/// The cached records for `T`, or `None` when there is no usable snapshot.
	pub async fn load<T: AccountRecord>(&self) -> Option<Vec<Keyed<T>>> {
		match self.try_load::<T>().await {
			Ok(records) => records,
			Err(e) => {
				warn!("Ignoring {} cache snapshot: {}", T::KIND.collection(), e);
				None
			}
		}
	}

	pub async fn clear(&self, kind: AccountKind) -> Result<(), CacheError> {
		self.store.remove(&cache_key(kind)).await
	}
}
