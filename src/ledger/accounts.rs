//! Account buffer decoding and encoding.

use crate::ledger::codec::{ByteReader, ByteWriter, CodecError};
use crate::ledger::records::AccountRecord;
use crate::ledger::schema::AccountKind;

/// An absent, empty or all-zero buffer is an account that does not exist yet.
pub fn is_uninitialized(bytes: &[u8]) -> bool {
	bytes.iter().all(|b| *b == 0)
}

/// Which record kind a buffer holds, judged by its discriminator.
pub fn identify_account(bytes: &[u8]) -> Result<AccountKind, CodecError> {
	let discriminator = ByteReader::new(bytes).discriminator()?;
	AccountKind::from_discriminator(&discriminator)
		.ok_or(CodecError::UnknownDiscriminator(discriminator))
}

/// Decode an account buffer as `T`.
///
/// Returns `Ok(None)` when the account does not exist. Bytes after the last field are
/// ignored since accounts are allocated with spare space.
pub fn decode_account<T: AccountRecord>(bytes: &[u8]) -> Result<Option<T>, CodecError> {
	if is_uninitialized(bytes) {
		return Ok(None);
	}

	let kind = identify_account(bytes)?;
	if kind != T::KIND {
		return Err(CodecError::MalformedAccount(format!(
			"expected {} account, found {}",
			T::KIND,
			kind
		)));
	}

	let schema = kind.schema();
	if bytes.len() < schema.min_len() {
		return Err(CodecError::MalformedAccount(format!(
			"{} account needs at least {} bytes, got {}",
			schema.name,
			schema.min_len(),
			bytes.len()
		)));
	}

	let mut reader = ByteReader::new(&bytes[8..]);
	T::decode_body(&mut reader).map(Some)
}

pub fn encode_account<T: AccountRecord>(record: &T) -> Vec<u8> {
	let mut writer = ByteWriter::with_discriminator(&T::KIND.discriminator());
	record.encode_body(&mut writer);
	writer.into_bytes()
}
