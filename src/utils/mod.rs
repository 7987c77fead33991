//! Formatting helpers shared by the binary and the sync layer.

pub mod format;

pub use format::{format_token_amount, short_signature};
