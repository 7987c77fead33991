//! Ledger addresses and program-derived address computation.
//!
//! Addresses are 32-byte values rendered as base58. Record storage locations are not
//! random keys: they are derived from a namespace tag, seed bytes and the program id,
//! so any client can find a record again by recomputing its address.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a single derivation seed, namespace included.
pub const MAX_SEED_LEN: usize = 32;
/// Maximum number of seeds, namespace included.
pub const MAX_SEEDS: usize = 16;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
	#[error("invalid base58 address: {0}")]
	InvalidBase58(String),
	#[error("address must be 32 bytes, got {0}")]
	InvalidLength(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
	#[error("no disambiguator in 0..=255 produced an off-curve address")]
	DerivationExhausted,
	#[error("seed {index} is {len} bytes, maximum is {MAX_SEED_LEN}")]
	SeedTooLong { index: usize, len: usize },
	#[error("{0} seeds supplied, maximum is {MAX_SEEDS}")]
	TooManySeeds(usize),
}

/// A 32-byte ledger address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
	pub const fn new(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	pub fn to_bytes(self) -> [u8; 32] {
		self.0
	}

	pub fn decode(encoded: &str) -> Result<Self, AddressError> {
		let bytes = bs58::decode(encoded)
			.into_vec()
			.map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
		let bytes: [u8; 32] = bytes
			.try_into()
			.map_err(|v: Vec<u8>| AddressError::InvalidLength(v.len()))?;
		Ok(Self(bytes))
	}

	pub fn encode(&self) -> String {
		bs58::encode(self.0).into_string()
	}

	/// Whether these bytes decompress to an Ed25519 point, i.e. could be a signing key.
	pub fn is_on_curve(&self) -> bool {
		ed25519_dalek::VerifyingKey::from_bytes(&self.0).is_ok()
	}

	/// Leading characters of the base58 form, used for short record ids.
	pub fn short(&self) -> String {
		self.encode().chars().take(8).collect()
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.encode())
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Address({})", self.encode())
	}
}

impl FromStr for Address {
	type Err = AddressError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::decode(s)
	}
}

impl From<[u8; 32]> for Address {
	fn from(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}
}

impl Serialize for Address {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.encode())
	}
}

impl<'de> Deserialize<'de> for Address {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		Address::decode(&encoded).map_err(serde::de::Error::custom)
	}
}

/// Derive the address for `namespace` + `seeds` under `program_id`.
///
/// Tries disambiguators from 255 down to 0 and returns the first whose hash is not a
/// valid curve point, together with that disambiguator. Identical inputs always give
/// identical outputs.
pub fn derive_address(
	namespace: &[u8],
	seeds: &[&[u8]],
	program_id: &Address,
) -> Result<(Address, u8), DerivationError> {
	if seeds.len() + 1 > MAX_SEEDS {
		return Err(DerivationError::TooManySeeds(seeds.len() + 1));
	}
	for (index, seed) in std::iter::once(&namespace).chain(seeds.iter()).enumerate() {
		if seed.len() > MAX_SEED_LEN {
			return Err(DerivationError::SeedTooLong {
				index,
				len: seed.len(),
			});
		}
	}

	for bump in (0..=u8::MAX).rev() {
		let candidate = hash_candidate(namespace, seeds, bump, program_id);
		if !candidate.is_on_curve() {
			return Ok((candidate, bump));
		}
	}

	Err(DerivationError::DerivationExhausted)
}

fn hash_candidate(namespace: &[u8], seeds: &[&[u8]], bump: u8, program_id: &Address) -> Address {
	let mut hasher = Sha256::new();
	hasher.update(namespace);
	for seed in seeds {
		hasher.update(seed);
	}
	hasher.update([bump]);
	hasher.update(program_id.as_bytes());
	hasher.update(PDA_MARKER);
	Address(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
	use super::*;

	const PROGRAM: &str = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS";

	fn program() -> Address {
		PROGRAM.parse().expect("program id parses")
	}

	#[test]
	fn test_base58_roundtrip() {
		let program = program();
		assert_eq!(program.to_string(), PROGRAM);
		assert_eq!(
			Address::decode("11111111111111111111111111111112")
				.expect("system-style address parses")
				.0[31],
			1
		);
	}

	#[test]
	fn test_rejects_wrong_length() {
		assert_eq!(
			Address::decode("1111"),
			Err(AddressError::InvalidLength(4))
		);
		assert!(matches!(
			Address::decode("0OIl"),
			Err(AddressError::InvalidBase58(_))
		));
	}

	#[test]
	fn test_derivation_is_deterministic() {
		let owner = Address::decode("11111111111111111111111111111112").expect("owner parses");
		let first = derive_address(b"user_profile", &[owner.as_bytes()], &program())
			.expect("derivation succeeds");
		let second = derive_address(b"user_profile", &[owner.as_bytes()], &program())
			.expect("derivation succeeds");
		assert_eq!(first, second);
		assert!(!first.0.is_on_curve());
	}

	#[test]
	fn test_derivation_known_vectors() {
		let (dao, bump) = derive_address(b"dao_state", &[], &program()).expect("derives");
		assert_eq!(dao.to_string(), "5TA5HpwaFqhYoNFYq7AYeKghixTEggFMuFVtwzKsyBXy");
		assert_eq!(bump, 255);

		let (activity, bump) = derive_address(b"activity", &[b"1"], &program()).expect("derives");
		assert_eq!(activity.to_string(), "8amjM3e5o1mu8PS7akKV9JrJi5SXXBYqSHRYzrW48KCL");
		assert_eq!(bump, 254);
	}

	#[test]
	fn test_seed_change_changes_address() {
		let (a, _) = derive_address(b"activity", &[b"beach-1"], &program()).expect("derives");
		let (b, _) = derive_address(b"activity", &[b"beach-2"], &program()).expect("derives");
		let (c, _) = derive_address(b"strike", &[b"beach-1"], &program()).expect("derives");
		assert_ne!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn test_seed_limits() {
		let long = [7u8; 33];
		assert_eq!(
			derive_address(b"activity", &[&long], &program()),
			Err(DerivationError::SeedTooLong { index: 1, len: 33 })
		);
		let seeds: Vec<&[u8]> = (0..16).map(|_| b"x".as_slice()).collect();
		assert_eq!(
			derive_address(b"activity", &seeds, &program()),
			Err(DerivationError::TooManySeeds(17))
		);
	}

	#[test]
	fn test_serde_uses_base58() {
		let program = program();
		let json = serde_json::to_string(&program).expect("serializes");
		assert_eq!(json, format!("\"{}\"", PROGRAM));
		let back: Address = serde_json::from_str(&json).expect("deserializes");
		assert_eq!(back, program);
	}
}
