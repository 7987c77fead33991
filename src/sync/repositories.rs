use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CacheError {
	#[error("Cache IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Cache snapshot is not valid JSON: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Invalid cache key: {0}")]
	InvalidKey(String),

	#[error("Snapshot under {key} holds {found} records")]
	KindMismatch { key: String, found: String },
}

/// Best-effort string-keyed store backing the local cache.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
	async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
	async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

fn validate_key(key: &str) -> Result<(), CacheError> {
	let valid = !key.is_empty()
		&& key
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
	if valid {
		Ok(())
	} else {
		Err(CacheError::InvalidKey(key.to_string()))
	}
}

/// One JSON file per key inside a data directory
pub struct FileCacheStore {
	data_dir: PathBuf,
}

impl FileCacheStore {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_filename(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.json", key))
	}
}

#[async_trait::async_trait]
impl CacheStore for FileCacheStore {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		validate_key(key)?;
		match tokio::fs::read_to_string(self.get_filename(key)).await {
			Ok(content) => Ok(Some(content)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
		validate_key(key)?;
		tokio::fs::create_dir_all(&self.data_dir).await?;

		// Write then rename so a crash never leaves a half-written snapshot behind.
		let filename = self.get_filename(key);
		let temp = self.data_dir.join(format!("{}.json.tmp", key));
		tokio::fs::write(&temp, value).await?;
		tokio::fs::rename(&temp, &filename).await?;
		debug!("Wrote {} bytes to {:?}", value.len(), filename);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), CacheError> {
		validate_key(key)?;
		match tokio::fs::remove_file(self.get_filename(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-process store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryCacheStore {
	entries: Mutex<HashMap<String, String>>,
}

impl MemoryCacheStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.lock().await.is_empty()
	}
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		validate_key(key)?;
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
		validate_key(key)?;
		self.entries
			.lock()
			.await
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), CacheError> {
		validate_key(key)?;
		self.entries.lock().await.remove(key);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_file_store_survives_reopen() {
		let dir = tempfile::tempdir().expect("tempdir");
		let data_dir = dir.path().join("cache");

		let store = FileCacheStore::new(data_dir.clone());
		assert_eq!(store.get("transcendence_activities").await.expect("reads"), None);
		store
			.set("transcendence_activities", "{\"records\":[]}")
			.await
			.expect("writes");

		let reopened = FileCacheStore::new(data_dir.clone());
		assert_eq!(
			reopened
				.get("transcendence_activities")
				.await
				.expect("reads")
				.as_deref(),
			Some("{\"records\":[]}")
		);
		assert!(!data_dir.join("transcendence_activities.json.tmp").exists());

		reopened.remove("transcendence_activities").await.expect("removes");
		reopened.remove("transcendence_activities").await.expect("missing is fine");
		assert_eq!(reopened.get("transcendence_activities").await.expect("reads"), None);
	}

	#[tokio::test]
	async fn test_keys_cannot_escape_directory() {
		let store = MemoryCacheStore::new();
		for key in ["", "../etc/passwd", "a/b", "a b"] {
			assert!(matches!(
				store.set(key, "x").await,
				Err(CacheError::InvalidKey(_))
			));
		}
		assert!(store.is_empty().await);
	}

	#[tokio::test]
	async fn test_memory_store() {
		let store = MemoryCacheStore::new();
		store.set("k", "v1").await.expect("set");
		store.set("k", "v2").await.expect("set");
		assert_eq!(store.get("k").await.expect("get").as_deref(), Some("v2"));
		assert_eq!(store.len().await, 1);
		store.remove("k").await.expect("remove");
		assert_eq!(store.get("k").await.expect("get"), None);
	}
}
