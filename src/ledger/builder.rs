//! Transaction builder
//!
//! Compiles program instructions into a signed transaction in the ledger's legacy wire
//! format, ready for `sendTransaction`.

use crate::ledger::address::Address;
use crate::ledger::identity::{Identity, IdentityError};
use crate::ledger::instructions::Instruction;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransactionError {
	#[error("Transaction has no instructions")]
	NoInstructions,

	#[error("Transaction is missing a {0}")]
	Incomplete(&'static str),

	#[error("Transaction needs a signature from {0}, which the identity cannot provide")]
	MissingSigner(Address),

	#[error("Transaction references {0} accounts, at most 256 are addressable")]
	TooManyAccounts(usize),

	#[error("Signing failed: {0}")]
	Signing(#[from] IdentityError),
}

/// A compiled, unsigned message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub num_required_signatures: u8,
	pub num_readonly_signed: u8,
	pub num_readonly_unsigned: u8,
	pub account_keys: Vec<Address>,
	pub recent_blockhash: [u8; 32],
	pub instructions: Vec<CompiledInstruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
	pub program_index: u8,
	pub account_indices: Vec<u8>,
	pub data: Vec<u8>,
}

impl Message {
	pub fn serialize(&self) -> Vec<u8> {
		let mut buf = vec![
			self.num_required_signatures,
			self.num_readonly_signed,
			self.num_readonly_unsigned,
		];
		put_compact_len(&mut buf, self.account_keys.len());
		for key in &self.account_keys {
			buf.extend_from_slice(key.as_bytes());
		}
		buf.extend_from_slice(&self.recent_blockhash);
		put_compact_len(&mut buf, self.instructions.len());
		for ix in &self.instructions {
			buf.push(ix.program_index);
			put_compact_len(&mut buf, ix.account_indices.len());
			buf.extend_from_slice(&ix.account_indices);
			put_compact_len(&mut buf, ix.data.len());
			buf.extend_from_slice(&ix.data);
		}
		buf
	}

	pub fn signers(&self) -> &[Address] {
		&self.account_keys[..self.num_required_signatures as usize]
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	pub signatures: Vec<[u8; 64]>,
	pub message: Vec<u8>,
}

impl SignedTransaction {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(1 + self.signatures.len() * 64 + self.message.len());
		put_compact_len(&mut buf, self.signatures.len());
		for signature in &self.signatures {
			buf.extend_from_slice(signature);
		}
		buf.extend_from_slice(&self.message);
		buf
	}

	/// The first signature in base58, which the ledger uses as the transaction id.
	pub fn id(&self) -> String {
		self.signatures
			.first()
			.map(|s| bs58::encode(s).into_string())
			.unwrap_or_default()
	}
}

/// Encode a length as the ledger's variable-width "compact u16".
fn put_compact_len(buf: &mut Vec<u8>, len: usize) {
	let mut value = len as u16;
	loop {
		let mut byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			buf.push(byte);
			return;
		}
		byte |= 0x80;
		buf.push(byte);
	}
}

#[derive(Debug, Clone, Copy)]
struct KeyFlags {
	address: Address,
	is_signer: bool,
	is_writable: bool,
}

/// Builder for signed transactions.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
	fee_payer: Option<Address>,
	recent_blockhash: Option<[u8; 32]>,
	instructions: Vec<Instruction>,
}

impl TransactionBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the account that pays fees; it is always the first signer.
	pub fn with_fee_payer(mut self, fee_payer: Address) -> Self {
		self.fee_payer = Some(fee_payer);
		self
	}

	pub fn with_recent_blockhash(mut self, blockhash: [u8; 32]) -> Self {
		self.recent_blockhash = Some(blockhash);
		self
	}

	pub fn with_instruction(mut self, instruction: Instruction) -> Self {
		self.instructions.push(instruction);
		self
	}

	pub fn with_instructions(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
		self.instructions.extend(instructions);
		self
	}

	pub fn compile(&self) -> Result<Message, TransactionError> {
		if self.instructions.is_empty() {
			return Err(TransactionError::NoInstructions);
		}
		let fee_payer = self
			.fee_payer
			.ok_or(TransactionError::Incomplete("fee payer"))?;
		let recent_blockhash = self
			.recent_blockhash
			.ok_or(TransactionError::Incomplete("recent blockhash"))?;

		// First appearance decides position within a group; flags are merged.
		let mut keys: Vec<KeyFlags> = vec![KeyFlags {
			address: fee_payer,
			is_signer: true,
			is_writable: true,
		}];
		let mut note = |address: Address, is_signer: bool, is_writable: bool| {
			match keys.iter_mut().find(|k| k.address == address) {
				Some(existing) => {
					existing.is_signer |= is_signer;
					existing.is_writable |= is_writable;
				}
				None => keys.push(KeyFlags {
					address,
					is_signer,
					is_writable,
				}),
			}
		};
		for ix in &self.instructions {
			for meta in &ix.accounts {
				note(meta.address, meta.is_signer, meta.is_writable);
			}
			note(ix.program_id, false, false);
		}

		let group = |k: &KeyFlags| -> u8 {
			match (k.is_signer, k.is_writable) {
				(true, true) => 0,
				(true, false) => 1,
				(false, true) => 2,
				(false, false) => 3,
			}
		};
		// Stable sort keeps the fee payer first.
		keys.sort_by_key(group);

		if keys.len() > 256 {
			return Err(TransactionError::TooManyAccounts(keys.len()));
		}

		let count = |g: u8| keys.iter().filter(|k| group(k) == g).count() as u8;
		let account_keys: Vec<Address> = keys.iter().map(|k| k.address).collect();
		let index_of = |address: &Address| {
			account_keys
				.iter()
				.position(|k| k == address)
				.map(|i| i as u8)
				.unwrap_or_default()
		};

		let instructions = self
			.instructions
			.iter()
			.map(|ix| CompiledInstruction {
				program_index: index_of(&ix.program_id),
				account_indices: ix.accounts.iter().map(|m| index_of(&m.address)).collect(),
				data: ix.data.clone(),
			})
			.collect();

		Ok(Message {
			num_required_signatures: count(0) + count(1),
			num_readonly_signed: count(1),
			num_readonly_unsigned: count(3),
			account_keys,
			recent_blockhash,
			instructions,
		})
	}

	/// Compile and sign with `identity`, which must be the only required signer.
	pub fn build_signed(self, identity: &dyn Identity) -> Result<SignedTransaction, TransactionError> {
		let message = self.compile()?;
		let signer = identity.address();
		if let Some(other) = message.signers().iter().find(|s| **s != signer) {
			return Err(TransactionError::MissingSigner(*other));
		}

		let message = message.serialize();
		let signature = identity.sign(&message)?;
		tracing::debug!(
			"Signed transaction {} ({} bytes)",
			bs58::encode(signature).into_string(),
			message.len()
		);
		Ok(SignedTransaction {
			signatures: vec![signature],
			message,
		})
	}
}
