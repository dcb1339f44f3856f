//! Chain and block integrity checks.
//!
//! Structural validity and proof-of-work are kept as separate predicates:
//! [`validate_chain`] never looks at leading zeros, because historical blocks
//! may have been mined under a different difficulty. The proof-of-work check
//! only runs when a single block is ingested, via [`validate_incoming_block`].

use crate::{
    compute_hash,
    constants::{GENESIS_HASH, GENESIS_PREVIOUS_HASH},
    error::ValidationError,
    pow::{count_leading_zero_hex, meets_difficulty},
    Block,
};

/// Check genesis, hash recomputation, parent linkage and index sequence.
/// Returns the first violation found.
pub fn validate_chain(chain: &[Block]) -> Result<(), ValidationError> {
    let genesis = chain.first().ok_or(ValidationError::EmptyChain)?;
    if genesis.index != 0
        || genesis.previous_hash != GENESIS_PREVIOUS_HASH
        || genesis.hash != GENESIS_HASH
    {
        return Err(ValidationError::BadGenesis);
    }
    for pair in chain.windows(2) {
        validate_link(&pair[0], &pair[1])?;
    }
    Ok(())
}

/// Check that `block` is a well-formed child of `parent`.
pub fn validate_link(parent: &Block, block: &Block) -> Result<(), ValidationError> {
    if block.hash != compute_hash(block) {
        return Err(ValidationError::HashMismatch { index: block.index });
    }
    if block.previous_hash != parent.hash {
        return Err(ValidationError::BrokenLink { index: block.index });
    }
    let expected = parent.index + 1;
    if block.index != expected {
        return Err(ValidationError::BadIndex {
            index: block.index,
            expected,
        });
    }
    Ok(())
}

pub fn structurally_valid(chain: &[Block]) -> bool {
    validate_chain(chain).is_ok()
}

pub fn is_valid(chain: &[Block]) -> bool {
    structurally_valid(chain)
}

/// Ingestion-time check for a single block: its hash recomputes and meets the
/// node's current `difficulty`.
pub fn validate_incoming_block(block: &Block, difficulty: u32) -> Result<(), ValidationError> {
    if block.hash != compute_hash(block) {
        return Err(ValidationError::HashMismatch { index: block.index });
    }
    if !meets_difficulty(&block.hash, difficulty) {
        return Err(ValidationError::InsufficientWork {
            index: block.index,
            found: count_leading_zero_hex(&block.hash),
            required: difficulty,
        });
    }
    Ok(())
}
