//! Low-level wire primitives shared by instruction and account encoding.
//!
//! Integers are little-endian, booleans are one byte, text is a u32 length followed by
//! the raw bytes, lists are a u32 count followed by fixed-width entries, and enums are a
//! single tag byte holding the variant's declaration index.

use crate::ledger::address::Address;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
	#[error("malformed account: {0}")]
	MalformedAccount(String),

	#[error("unknown discriminator {}", hex::encode(.0))]
	UnknownDiscriminator([u8; 8]),

	#[error("invalid {enum_name} tag {tag}")]
	InvalidVariantTag { enum_name: &'static str, tag: u8 },
}

/// A closed enumeration carried on the wire as a single tag byte.
pub trait WireEnum: Sized + Copy + 'static {
	const NAME: &'static str;
	/// Variants in declaration order; a variant's tag is its index.
	const VARIANTS: &'static [Self];

	fn tag(self) -> u8;

	fn from_tag(tag: u8) -> Option<Self> {
		Self::VARIANTS.get(tag as usize).copied()
	}
}

/// Strictly decode the leading tag byte of `bytes` into `E`.
pub fn decode_variant_tag<E: WireEnum>(bytes: &[u8]) -> Result<E, CodecError> {
	let tag = *bytes.first().ok_or_else(|| {
		CodecError::MalformedAccount(format!("missing {} tag", E::NAME))
	})?;
	E::from_tag(tag).ok_or(CodecError::InvalidVariantTag {
		enum_name: E::NAME,
		tag,
	})
}

#[derive(Debug, Default)]
pub struct ByteWriter {
	buf: Vec<u8>,
}

impl ByteWriter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_discriminator(discriminator: &[u8; 8]) -> Self {
		let mut writer = Self::new();
		writer.buf.extend_from_slice(discriminator);
		writer
	}

	pub fn put_u8(&mut self, value: u8) -> &mut Self {
		self.buf.push(value);
		self
	}

	pub fn put_bool(&mut self, value: bool) -> &mut Self {
		self.put_u8(value as u8)
	}

	pub fn put_u32(&mut self, value: u32) -> &mut Self {
		self.buf.extend_from_slice(&value.to_le_bytes());
		self
	}

	pub fn put_u64(&mut self, value: u64) -> &mut Self {
		self.buf.extend_from_slice(&value.to_le_bytes());
		self
	}

	pub fn put_i64(&mut self, value: i64) -> &mut Self {
		self.buf.extend_from_slice(&value.to_le_bytes());
		self
	}

	pub fn put_f64(&mut self, value: f64) -> &mut Self {
		self.buf.extend_from_slice(&value.to_le_bytes());
		self
	}

	pub fn put_timestamp(&mut self, value: &DateTime<Utc>) -> &mut Self {
		self.put_i64(value.timestamp())
	}

	pub fn put_address(&mut self, value: &Address) -> &mut Self {
		self.buf.extend_from_slice(value.as_bytes());
		self
	}

	pub fn put_str(&mut self, value: &str) -> &mut Self {
		self.put_u32(value.len() as u32);
		self.buf.extend_from_slice(value.as_bytes());
		self
	}

	pub fn put_tag<E: WireEnum>(&mut self, value: E) -> &mut Self {
		self.put_u8(value.tag())
	}

	pub fn put_addresses(&mut self, values: &[Address]) -> &mut Self {
		self.put_u32(values.len() as u32);
		for value in values {
			self.put_address(value);
		}
		self
	}

	pub fn put_tags<E: WireEnum>(&mut self, values: &[E]) -> &mut Self {
		self.put_u32(values.len() as u32);
		for value in values {
			self.put_tag(*value);
		}
		self
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.buf
	}
}

/// Cursor over a byte buffer. Every read checks the remaining length first.
#[derive(Debug)]
pub struct ByteReader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> ByteReader<'a> {
	pub fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	pub fn position(&self) -> usize {
		self.pos
	}

	pub fn remaining(&self) -> usize {
		self.bytes.len() - self.pos
	}

	fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], CodecError> {
		if len > self.remaining() {
			return Err(CodecError::MalformedAccount(format!(
				"{} needs {} bytes at offset {}, only {} remain",
				what,
				len,
				self.pos,
				self.remaining()
			)));
		}
		let slice = &self.bytes[self.pos..self.pos + len];
		self.pos += len;
		Ok(slice)
	}

	fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], CodecError> {
		let mut out = [0u8; N];
		out.copy_from_slice(self.take(N, what)?);
		Ok(out)
	}

	pub fn discriminator(&mut self) -> Result<[u8; 8], CodecError> {
		self.take_array("discriminator")
	}

	pub fn u8(&mut self) -> Result<u8, CodecError> {
		Ok(self.take_array::<1>("u8")?[0])
	}

	pub fn bool(&mut self) -> Result<bool, CodecError> {
		match self.u8()? {
			0 => Ok(false),
			1 => Ok(true),
			other => Err(CodecError::MalformedAccount(format!(
				"invalid bool byte {} at offset {}",
				other,
				self.pos - 1
			))),
		}
	}

	pub fn u32(&mut self) -> Result<u32, CodecError> {
		Ok(u32::from_le_bytes(self.take_array("u32")?))
	}

	pub fn u64(&mut self) -> Result<u64, CodecError> {
		Ok(u64::from_le_bytes(self.take_array("u64")?))
	}

	pub fn i64(&mut self) -> Result<i64, CodecError> {
		Ok(i64::from_le_bytes(self.take_array("i64")?))
	}

	pub fn f64(&mut self) -> Result<f64, CodecError> {
		Ok(f64::from_le_bytes(self.take_array("f64")?))
	}

	pub fn timestamp(&mut self) -> Result<DateTime<Utc>, CodecError> {
		let secs = self.i64()?;
		DateTime::from_timestamp(secs, 0).ok_or_else(|| {
			CodecError::MalformedAccount(format!("timestamp {} out of range", secs))
		})
	}

	pub fn address(&mut self) -> Result<Address, CodecError> {
		Ok(Address(self.take_array("address")?))
	}

	pub fn string(&mut self) -> Result<String, CodecError> {
		let len = self.u32()? as usize;
		let raw = self.take(len, "text")?;
		String::from_utf8(raw.to_vec())
			.map_err(|e| CodecError::MalformedAccount(format!("text is not utf-8: {}", e)))
	}

	pub fn tag<E: WireEnum>(&mut self) -> Result<E, CodecError> {
		let tag = self.u8()?;
		E::from_tag(tag).ok_or(CodecError::InvalidVariantTag {
			enum_name: E::NAME,
			tag,
		})
	}

	/// Decode a tag, substituting `fallback` for unknown values.
	pub fn tag_or<E: WireEnum + std::fmt::Debug>(&mut self, fallback: E) -> Result<E, CodecError> {
		let tag = self.u8()?;
		Ok(E::from_tag(tag).unwrap_or_else(|| {
			tracing::warn!(
				"Unknown {} tag {}, decoding as {:?}",
				E::NAME,
				tag,
				fallback
			);
			fallback
		}))
	}

	pub fn addresses(&mut self) -> Result<Vec<Address>, CodecError> {
		let count = self.u32()? as usize;
		// Checked before allocating so a corrupt count cannot request a huge buffer.
		if count.saturating_mul(32) > self.remaining() {
			return Err(CodecError::MalformedAccount(format!(
				"address list of {} entries exceeds remaining {} bytes",
				count,
				self.remaining()
			)));
		}
		(0..count).map(|_| self.address()).collect()
	}

	pub fn tags<E: WireEnum>(&mut self) -> Result<Vec<E>, CodecError> {
		let count = self.u32()? as usize;
		if count > self.remaining() {
			return Err(CodecError::MalformedAccount(format!(
				"{} list of {} entries exceeds remaining {} bytes",
				E::NAME,
				count,
				self.remaining()
			)));
		}
		(0..count).map(|_| self.tag()).collect()
	}
}
