//! The signer boundary.
//!
//! An [`Identity`] supplies the address writes are attributed to and signs transaction
//! messages. [`KeypairIdentity`] keeps an Ed25519 key in memory; the on-disk format is the
//! common JSON array of 64 bytes (secret key followed by public key).

use crate::ledger::address::Address;
use ed25519_dalek::{Signer, SigningKey};
use rand::Rng;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
	#[error("Failed to read keypair file: {0}")]
	Io(#[from] std::io::Error),

	#[error("Keypair file is not a JSON byte array: {0}")]
	Format(#[from] serde_json::Error),

	#[error("Invalid keypair: {0}")]
	InvalidKeypair(String),

	#[error("Signing refused: {0}")]
	SigningRefused(String),
}

pub trait Identity: Send + Sync {
	fn address(&self) -> Address;

	fn sign(&self, message: &[u8]) -> Result<[u8; 64], IdentityError>;
}

pub struct KeypairIdentity {
	key: SigningKey,
}

impl KeypairIdentity {
	pub fn from_secret(secret: [u8; 32]) -> Self {
		Self {
			key: SigningKey::from_bytes(&secret),
		}
	}

	pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
		let bytes: &[u8; 64] = bytes.try_into().map_err(|_| {
			IdentityError::InvalidKeypair(format!("expected 64 bytes, got {}", bytes.len()))
		})?;
		let key = SigningKey::from_keypair_bytes(bytes)
			.map_err(|e| IdentityError::InvalidKeypair(e.to_string()))?;
		Ok(Self { key })
	}

	pub fn generate() -> Self {
		let mut secret = [0u8; 32];
		rand::rng().fill(&mut secret);
		Self::from_secret(secret)
	}

	pub async fn load(path: &Path) -> Result<Self, IdentityError> {
		let content = tokio::fs::read_to_string(path).await?;
		let bytes: Vec<u8> = serde_json::from_str(&content)?;
		Self::from_keypair_bytes(&bytes)
	}

	pub async fn save(&self, path: &Path) -> Result<(), IdentityError> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let bytes = self.key.to_keypair_bytes().to_vec();
		tokio::fs::write(path, serde_json::to_string(&bytes)?).await?;
		Ok(())
	}

	/// Load the keypair at `path`, creating and saving a fresh one if none exists.
	pub async fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
		if tokio::fs::try_exists(path).await? {
			return Self::load(path).await;
		}
		let identity = Self::generate();
		identity.save(path).await?;
		tracing::info!("Generated new identity {} at {:?}", identity.address(), path);
		Ok(identity)
	}
}

impl Identity for KeypairIdentity {
	fn address(&self) -> Address {
		Address::new(self.key.verifying_key().to_bytes())
	}

	fn sign(&self, message: &[u8]) -> Result<[u8; 64], IdentityError> {
		Ok(self.key.sign(message).to_bytes())
	}
}

impl fmt::Debug for KeypairIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeypairIdentity")
			.field("address", &self.address())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ed25519_dalek::{Signature, Verifier, VerifyingKey};

	#[test]
	fn test_signature_verifies_against_address() {
		let identity = KeypairIdentity::from_secret([11; 32]);
		let signature = identity.sign(b"message").expect("signs");

		let key = VerifyingKey::from_bytes(identity.address().as_bytes()).expect("on curve");
		key.verify(b"message", &Signature::from_bytes(&signature))
			.expect("signature verifies");
		assert!(identity.address().is_on_curve());
	}

	#[test]
	fn test_keypair_bytes_length() {
		assert!(matches!(
			KeypairIdentity::from_keypair_bytes(&[1; 10]),
			Err(IdentityError::InvalidKeypair(_))
		));
	}

	#[tokio::test]
	async fn test_keypair_file_roundtrip() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("keys").join("id.json");

		let created = KeypairIdentity::load_or_generate(&path).await.expect("creates");
		let loaded = KeypairIdentity::load_or_generate(&path).await.expect("loads");
		assert_eq!(created.address(), loaded.address());

		let content = std::fs::read_to_string(&path).expect("file written");
		let bytes: Vec<u8> = serde_json::from_str(&content).expect("json array");
		assert_eq!(bytes.len(), 64);
	}

	#[test]
	fn test_debug_hides_secret() {
		let identity = KeypairIdentity::from_secret([3; 32]);
		let rendered = format!("{:?}", identity);
		assert!(rendered.contains(&identity.address().to_string()));
		assert!(!rendered.contains(&hex::encode([3u8; 32])));
	}
}
