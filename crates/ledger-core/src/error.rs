use serde::Serialize;
use thiserror::Error;

/// Why a block or chain failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("chain is empty")]
    EmptyChain,
    #[error("genesis block does not match the sentinel")]
    BadGenesis,
    #[error("block {index}: stored hash does not match its contents")]
    HashMismatch { index: u64 },
    #[error("block {index}: previous_hash does not match the parent's hash")]
    BrokenLink { index: u64 },
    #[error("block {index}: expected index {expected}")]
    BadIndex { index: u64, expected: u64 },
    #[error("block {index}: hash has {found} leading zeros, {required} required")]
    InsufficientWork {
        index: u64,
        found: u32,
        required: u32,
    },
}

/// Why a peer's chain was not accepted by the whole-chain replacement path.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceRejection {
    #[error("received chain is invalid: {0}")]
    Invalid(#[from] ValidationError),
    #[error("received chain is not longer (received {received}, local {local})")]
    NotLonger { received: usize, local: usize },
}
