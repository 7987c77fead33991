pub mod client;
pub mod types;

pub use client::RpcClient;
pub use types::{Commitment, RpcError};
