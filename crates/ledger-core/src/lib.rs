pub mod consensus;
pub mod constants;
pub mod error;
pub mod fork;
pub mod ledger;
pub mod pow;
pub mod validate;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use consensus::{block_work, branch_work, Resolution};
pub use error::{ReplaceRejection, ValidationError};
pub use fork::{ForkSet, RouteOutcome};
pub use ledger::{BlockOutcome, ChainOutcome, ConsensusConfig, Ledger, MineResult, MiningJob};
pub use validate::{is_valid, structurally_valid, validate_chain, validate_incoming_block};

/// A value transfer. `from` is `None` for coinbase rewards, which create value
/// out of nothing and credit the miner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Option<String>,
    pub to: String,
    pub amount: f64,
}

impl Transaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: f64) -> Self {
        Self {
            from: Some(from.into()),
            to: to.into(),
            amount,
        }
    }

    pub fn coinbase(to: impl Into<String>, amount: f64) -> Self {
        Self {
            from: None,
            to: to.into(),
            amount,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.from.is_none()
    }

    fn encode_into(&self, bytes: &mut Vec<u8>) {
        match &self.from {
            Some(from) => {
                bytes.push(1);
                put_str(bytes, from);
            }
            None => bytes.push(0),
        }
        put_str(bytes, &self.to);
        // -0.0 and 0.0 compare equal, so they must encode equal too.
        let amount = if self.amount == 0.0 { 0.0f64 } else { self.amount };
        bytes.extend_from_slice(&amount.to_bits().to_le_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    pub miner: String,
    pub difficulty: u32,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// An unsealed block with nonce 0 and an empty hash.
    pub fn template(
        index: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
        miner: impl Into<String>,
        difficulty: u32,
    ) -> Self {
        Self {
            index,
            previous_hash: previous_hash.into(),
            transactions,
            miner: miner.into(),
            difficulty,
            nonce: 0,
            hash: String::new(),
        }
    }

    /// Canonical encoding of every field except `hash`.
    ///
    /// Strings are length-prefixed with a little-endian `u64` byte count and the
    /// transaction list with its element count, so no two distinct blocks can
    /// share an encoding.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128 + self.transactions.len() * 64);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        put_str(&mut bytes, &self.previous_hash);
        bytes.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            tx.encode_into(&mut bytes);
        }
        put_str(&mut bytes, &self.miner);
        bytes.extend_from_slice(&self.difficulty.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Store the computed content hash in `hash`.
    pub fn seal(mut self) -> Self {
        self.hash = compute_hash(&self);
        self
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == compute_hash(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

fn put_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u64).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}

/// Hex-encoded SHA-256 over [`Block::hash_bytes`]. The stored `hash` is ignored.
pub fn compute_hash(block: &Block) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block.hash_bytes());
    hex::encode(hasher.finalize())
}

pub mod chain {
    use super::*;
    use crate::constants::{GENESIS_HASH, GENESIS_MINER, GENESIS_PREVIOUS_HASH};
    use anyhow::Result;
    use parking_lot::Mutex;

    /// Trait the storage backends implement so the ledger can write itself back out.
    /// This lives in `ledger-core` to avoid a circular dependency.
    pub trait ChainStore: Send + Sync {
        /// Load the persisted chain. Backends fall back to a genesis-only chain
        /// when nothing usable is stored.
        fn load_chain(&self) -> Result<Vec<Block>>;
        /// Replace the persisted chain with `chain`.
        fn save_chain(&self, chain: &[Block]) -> Result<()>;
    }

    /// Keeps the last saved chain in memory. Used by tests and ephemeral nodes.
    #[derive(Default)]
    pub struct MemoryStore {
        chain: Mutex<Option<Vec<Block>>>,
        saves: Mutex<u64>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of `save_chain` calls so far.
        pub fn saves(&self) -> u64 {
            *self.saves.lock()
        }
    }

    impl ChainStore for MemoryStore {
        fn load_chain(&self) -> Result<Vec<Block>> {
            Ok(self
                .chain
                .lock()
                .clone()
                .unwrap_or_else(|| vec![genesis_block()]))
        }

        fn save_chain(&self, chain: &[Block]) -> Result<()> {
            *self.chain.lock() = Some(chain.to_vec());
            *self.saves.lock() += 1;
            Ok(())
        }
    }

    /// The sentinel first block. It is never hashed or mined.
    pub fn genesis_block() -> Block {
        Block {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            transactions: vec![],
            miner: GENESIS_MINER.to_string(),
            difficulty: 0,
            nonce: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    /// Net amount received minus amount sent by `id` across the whole chain.
    pub fn balance_of(chain: &[Block], id: &str) -> f64 {
        let mut balance = 0.0;
        for tx in chain.iter().flat_map(|b| b.transactions.iter()) {
            if tx.to == id {
                balance += tx.amount;
            }
            if tx.from.as_deref() == Some(id) {
                balance -= tx.amount;
            }
        }
        balance
    }
}
