//! Client data layer for the Transcendence DAO program.
//!
//! [`ledger`] holds the on-chain record model: addresses, the account codec, instruction
//! builders and transaction signing. [`sync`] keeps a local view of those records
//! current through tiered reads, a durable cache and push notifications. [`rpc`] is the
//! network transport.

pub mod config;
pub mod ledger;
pub mod rpc;
pub mod sync;
pub mod utils;

pub use config::{ConfigError, SyncConfig};
pub use rpc::{Commitment, RpcClient, RpcError};
pub use sync::{SyncError, SyncOrchestrator, WriteOutcome};
