//! Wire-level view of the DAO program: addresses, records, instructions and signing.

pub mod accounts;
pub mod address;
pub mod builder;
pub mod codec;
pub mod identity;
pub mod instructions;
pub mod records;
pub mod schema;

pub use accounts::{decode_account, encode_account, identify_account, is_uninitialized};
pub use address::{Address, AddressError, DerivationError, MAX_SEED_LEN, derive_address};
pub use builder::{SignedTransaction, TransactionBuilder, TransactionError};
pub use codec::{CodecError, WireEnum, decode_variant_tag};
pub use identity::{Identity, IdentityError, KeypairIdentity};
pub use instructions::{AccountMeta, DaoProgram, Instruction, InstructionArgs};
pub use records::*;
pub use schema::{AccountKind, InstructionKind};
