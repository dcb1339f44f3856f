//! The shared ledger state and the operations callers may run on it concurrently.
//!
//! The canonical chain, the fork set and the pending transaction pool sit
//! behind one mutex, so every append, splice or replacement is atomic with
//! respect to the others. Proof-of-work runs outside the lock: a
//! [`MiningJob`] snapshots what it needs, searches without holding anything,
//! and [`Ledger::commit_mined`] re-checks the tip before the block lands.

use crate::{
    chain::{balance_of, genesis_block, ChainStore},
    consensus::{resolve, should_replace, Resolution},
    constants::{DEFAULT_DIFFICULTY, DEFAULT_FORK_LIM, DEFAULT_REWARD},
    error::{ReplaceRejection, ValidationError},
    fork::{ForkSet, RouteOutcome},
    pow::{self, PowSearch},
    validate::{validate_chain, validate_incoming_block, validate_link},
    Block, Transaction,
};
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Leading zero hex characters required of mined and received blocks.
    pub difficulty: u32,
    /// Total forked blocks that trigger a resolution round.
    pub fork_lim: usize,
    pub reward: f64,
    /// Identifier credited by this node's coinbase transactions.
    pub miner: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            fork_lim: DEFAULT_FORK_LIM,
            reward: DEFAULT_REWARD,
            miner: "node".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BlockOutcome {
    /// Extended the canonical tip directly.
    Appended { index: u64 },
    /// Routed into the fork set, possibly triggering a resolution.
    Forked {
        route: RouteOutcome,
        resolution: Option<Resolution>,
    },
    /// Already part of the canonical chain.
    Known,
    Rejected { reason: ValidationError },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChainOutcome {
    Replaced { old_len: usize, new_len: usize },
    Rejected { reason: ReplaceRejection },
}

/// A freshly mined block and what the ledger did with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MineResult {
    pub block: Block,
    pub outcome: BlockOutcome,
}

/// Everything a miner needs, captured under the lock so the search itself can
/// run without it.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningJob {
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub index: u64,
    pub miner: String,
    pub reward: f64,
    pub difficulty: u32,
}

impl MiningJob {
    pub fn search(&self) -> PowSearch {
        PowSearch::new(pow::candidate(
            self.transactions.clone(),
            &self.previous_hash,
            self.index,
            &self.miner,
            self.reward,
            self.difficulty,
        ))
    }

    pub fn run(self) -> Block {
        pow::mine(
            self.transactions,
            &self.previous_hash,
            self.index,
            &self.miner,
            self.reward,
            self.difficulty,
        )
    }

    pub fn run_parallel(self) -> Block {
        pow::mine_parallel(
            self.transactions,
            &self.previous_hash,
            self.index,
            &self.miner,
            self.reward,
            self.difficulty,
        )
    }
}

struct LedgerState {
    chain: Vec<Block>,
    forks: ForkSet,
    pending: Vec<Transaction>,
}

pub struct Ledger<S: ChainStore> {
    state: Mutex<LedgerState>,
    store: Arc<S>,
    config: ConsensusConfig,
}

impl<S: ChainStore> Ledger<S> {
    /// Load the chain from `store`. A stored chain that fails validation is
    /// set aside and the ledger starts from genesis.
    pub fn open(store: Arc<S>, config: ConsensusConfig) -> Result<Self> {
        let mut chain = store.load_chain()?;
        if let Err(e) = validate_chain(&chain) {
            warn!("stored chain is invalid ({e}); starting from genesis");
            chain = vec![genesis_block()];
        }
        info!(
            height = chain.len() - 1,
            difficulty = config.difficulty,
            fork_lim = config.fork_lim,
            "ledger opened"
        );
        Ok(Self {
            state: Mutex::new(LedgerState {
                chain,
                forks: ForkSet::new(),
                pending: Vec::new(),
            }),
            store,
            config,
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ingest a block received from a peer.
    ///
    /// The block must recompute to its stored hash and meet the current
    /// difficulty. With no forks active, a block extending the tip is appended
    /// directly; anything else goes through fork tracking.
    pub fn observe_block(&self, block: Block) -> BlockOutcome {
        if let Err(reason) = validate_incoming_block(&block, self.config.difficulty) {
            warn!(index = block.index, "rejected block: {reason}");
            return BlockOutcome::Rejected { reason };
        }
        let mut state = self.state.lock();
        self.ingest(&mut state, block)
    }

    /// Ingest a peer's full chain via the longest-valid-chain rule. The fork
    /// set is left untouched.
    pub fn observe_chain(&self, chain: Vec<Block>) -> ChainOutcome {
        let mut state = self.state.lock();
        if let Err(reason) = should_replace(&state.chain, &chain) {
            debug!("chain not replaced: {reason}");
            return ChainOutcome::Rejected { reason };
        }
        let old_len = state.chain.len();
        state.chain = chain;
        let new_len = state.chain.len();
        info!(old_len, new_len, "replaced canonical chain with a longer one");
        self.persist(&state.chain);
        ChainOutcome::Replaced { old_len, new_len }
    }

    /// Add a transaction to the pending pool. Returns `false` if an equal one
    /// is already pending.
    pub fn submit_transaction(&self, tx: Transaction) -> bool {
        let mut state = self.state.lock();
        if state.pending.contains(&tx) {
            return false;
        }
        debug!(to = %tx.to, amount = tx.amount, "transaction pending");
        state.pending.push(tx);
        true
    }

    /// Snapshot the pending pool and the block to build on.
    ///
    /// While forks are active and one branch starts at the canonical tip, the
    /// miner builds on that branch's tip instead.
    pub fn prepare_mining(&self) -> MiningJob {
        let state = self.state.lock();
        let tip = canonical_tip(&state.chain);
        let (parent, index) = state
            .forks
            .branch_starting_with(&tip.hash)
            .and_then(|branch| branch.last())
            .and_then(|b| b.index.checked_add(1).map(|next| (b, next)))
            .unwrap_or((tip, tip.index.saturating_add(1)));
        MiningJob {
            transactions: state.pending.clone(),
            previous_hash: parent.hash.clone(),
            index,
            miner: self.config.miner.clone(),
            reward: self.config.reward,
            difficulty: self.config.difficulty,
        }
    }

    /// Commit a locally mined block against the state as it is now.
    ///
    /// If the tip moved while mining, the block is routed through fork
    /// tracking like any foreign block. The pending pool is emptied either way.
    pub fn commit_mined(&self, block: Block) -> BlockOutcome {
        let mut state = self.state.lock();
        state.pending.clear();
        self.ingest(&mut state, block)
    }

    /// Mine on the calling thread and commit the result.
    pub fn mine(&self) -> MineResult {
        let block = self.prepare_mining().run();
        let outcome = self.commit_mined(block.clone());
        MineResult { block, outcome }
    }

    pub fn current_chain(&self) -> Vec<Block> {
        self.state.lock().chain.clone()
    }

    pub fn active_forks(&self) -> Vec<Vec<Block>> {
        self.state.lock().forks.branches().to_vec()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().pending.clone()
    }

    pub fn tip(&self) -> Block {
        canonical_tip(&self.state.lock().chain).clone()
    }

    pub fn height(&self) -> u64 {
        canonical_tip(&self.state.lock().chain).index
    }

    pub fn balance_of(&self, id: &str) -> f64 {
        balance_of(&self.state.lock().chain, id)
    }

    fn ingest(&self, state: &mut LedgerState, block: Block) -> BlockOutcome {
        let known = usize::try_from(block.index)
            .ok()
            .and_then(|i| state.chain.get(i))
            .is_some_and(|b| b.hash == block.hash);
        if known {
            return BlockOutcome::Known;
        }

        let tip = canonical_tip(&state.chain);
        if state.forks.is_empty() && block.previous_hash == tip.hash {
            if let Err(reason) = validate_link(tip, &block) {
                warn!(index = block.index, "rejected block: {reason}");
                return BlockOutcome::Rejected { reason };
            }
            let index = block.index;
            state.chain.push(block);
            info!(index, "block appended to canonical chain");
            self.persist(&state.chain);
            return BlockOutcome::Appended { index };
        }

        let index = block.index;
        let route = state.forks.route(block, &state.chain);
        info!(index, ?route, forked_blocks = state.forks.total_blocks(), "block routed to forks");
        if route == RouteOutcome::Duplicate {
            return BlockOutcome::Forked {
                route,
                resolution: None,
            };
        }
        let resolution = resolve(&mut state.chain, &mut state.forks, self.config.fork_lim);
        if matches!(resolution, Some(Resolution::Spliced { .. })) {
            self.persist(&state.chain);
        }
        BlockOutcome::Forked { route, resolution }
    }

    fn persist(&self, chain: &[Block]) {
        if let Err(e) = self.store.save_chain(chain) {
            error!("failed to save chain: {e:#}");
        }
    }
}

fn canonical_tip(chain: &[Block]) -> &Block {
    // The chain always holds at least the genesis block.
    &chain[chain.len() - 1]
}
