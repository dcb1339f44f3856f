use crate::{compute_hash, constants::NONCES_PER_STEP, Block, Transaction};
use rayon::prelude::*;
use tracing::info;

/// Number of leading `'0'` characters in a hex hash.
pub fn count_leading_zero_hex(hash: &str) -> u32 {
    hash.bytes().take_while(|c| *c == b'0').count() as u32
}

/// The proof-of-work predicate: at least `difficulty` leading zero hex characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    count_leading_zero_hex(hash) >= difficulty
}

/// A nonce search over a fixed block template that can be paused and resumed.
///
/// The search only ever looks at `template.difficulty`; everything else in the
/// template is hashed as-is.
#[derive(Clone, Debug)]
pub struct PowSearch {
    template: Block,
    cursor: u64,
}

impl PowSearch {
    pub fn new(template: Block) -> Self {
        let cursor = template.nonce;
        Self { template, cursor }
    }

    /// The next nonce to be tried.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn template(&self) -> &Block {
        &self.template
    }

    /// Try at most `budget` nonces. Returns the sealed block on success, or
    /// `None` with the cursor advanced past the tried range.
    pub fn step(&mut self, budget: u64) -> Option<Block> {
        let difficulty = self.template.difficulty;
        for _ in 0..budget {
            self.template.nonce = self.cursor;
            let hash = compute_hash(&self.template);
            self.cursor = self.cursor.wrapping_add(1);
            if meets_difficulty(&hash, difficulty) {
                let mut block = self.template.clone();
                block.hash = hash;
                return Some(block);
            }
        }
        None
    }

    /// Search until a nonce is found.
    pub fn run(mut self) -> Block {
        loop {
            if let Some(block) = self.step(NONCES_PER_STEP) {
                return block;
            }
        }
    }
}

/// Build the candidate block: the supplied transactions followed by a coinbase
/// reward crediting `miner`.
pub fn candidate(
    mut transactions: Vec<Transaction>,
    previous_hash: &str,
    index: u64,
    miner: &str,
    reward: f64,
    difficulty: u32,
) -> Block {
    transactions.push(Transaction::coinbase(miner, reward));
    Block::template(index, previous_hash, transactions, miner, difficulty)
}

/// Mine a block by incrementing the nonce from 0 until its hash has at least
/// `difficulty` leading zero hex characters.
pub fn mine(
    transactions: Vec<Transaction>,
    previous_hash: &str,
    index: u64,
    miner: &str,
    reward: f64,
    difficulty: u32,
) -> Block {
    let template = candidate(transactions, previous_hash, index, miner, reward, difficulty);
    let block = PowSearch::new(template).run();
    info!(
        "Mined block {} with nonce {} and hash {}",
        block.index, block.nonce, block.hash
    );
    block
}

/// Same search as [`mine`], split across the rayon pool. `find_first` keeps the
/// result identical to the sequential search.
pub fn mine_parallel(
    transactions: Vec<Transaction>,
    previous_hash: &str,
    index: u64,
    miner: &str,
    reward: f64,
    difficulty: u32,
) -> Block {
    let base = candidate(transactions, previous_hash, index, miner, reward, difficulty);

    let mut from = 0u64;
    loop {
        // Bounded windows so find_first does not have to settle every earlier
        // split of the whole u64 range before returning.
        let window = NONCES_PER_STEP * rayon::current_num_threads() as u64;
        let to = from.saturating_add(window);
        let found = (from..to).into_par_iter().find_first(|nonce| {
            let mut b = base.clone();
            b.nonce = *nonce;
            meets_difficulty(&compute_hash(&b), difficulty)
        });
        if let Some(nonce) = found {
            let mut block = base;
            block.nonce = nonce;
            let block = block.seal();
            info!(
                "Mined block {} with nonce {} and hash {}",
                block.index, block.nonce, block.hash
            );
            return block;
        }
        from = to;
    }
}
