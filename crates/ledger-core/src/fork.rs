use crate::Block;
use serde::Serialize;
use tracing::debug;

/// Where [`ForkSet::route`] put a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// First competing block: the fork set now holds `branches` branches.
    Started { branches: usize },
    /// Appended to the branch whose tip is the block's parent.
    Extended { branch: usize },
    /// No branch tip matched; the block opened a new singleton branch.
    Orphan { branch: usize },
    /// A block with the same hash is already tracked.
    Duplicate,
}

/// Competing block sequences that diverge from the canonical chain.
///
/// Each branch is non-empty and its first block's index is the divergence
/// point. Branch order is observation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ForkSet {
    branches: Vec<Vec<Block>>,
}

impl ForkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn branches(&self) -> &[Vec<Block>] {
        &self.branches
    }

    pub fn total_blocks(&self) -> usize {
        self.branches.iter().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.branches.clear();
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.branches.iter().flatten().any(|b| b.hash == hash)
    }

    /// The branch whose first block has hash `hash`, if any.
    pub fn branch_starting_with(&self, hash: &str) -> Option<&[Block]> {
        self.branches
            .iter()
            .find(|branch| branch.first().is_some_and(|b| b.hash == hash))
            .map(Vec::as_slice)
    }

    /// Place `block` into the fork set.
    ///
    /// With no forks yet, two branches are opened: one holding only `block`, and
    /// one holding the canonical suffix from `block.index` to the tip (omitted
    /// when that suffix is empty). Otherwise the block joins the branch whose tip
    /// is its parent at the preceding index, or opens a new branch of its own.
    pub fn route(&mut self, block: Block, canonical: &[Block]) -> RouteOutcome {
        if self.contains(&block.hash) {
            debug!(index = block.index, hash = %block.hash, "block already tracked in a fork");
            return RouteOutcome::Duplicate;
        }

        if self.branches.is_empty() {
            let from = usize::try_from(block.index).unwrap_or(usize::MAX);
            let suffix = canonical.get(from..).unwrap_or_default().to_vec();
            self.branches.push(vec![block]);
            if !suffix.is_empty() {
                self.branches.push(suffix);
            }
            return RouteOutcome::Started {
                branches: self.branches.len(),
            };
        }

        if let Some(i) = self
            .branches
            .iter()
            .position(|branch| branch.last().is_some_and(|tip| extends(tip, &block)))
        {
            self.branches[i].push(block);
            return RouteOutcome::Extended { branch: i };
        }

        self.branches.push(vec![block]);
        RouteOutcome::Orphan {
            branch: self.branches.len() - 1,
        }
    }
}

/// A child must name `tip` as its parent and sit exactly one index above it.
fn extends(tip: &Block, block: &Block) -> bool {
    tip.hash == block.previous_hash && tip.index.checked_add(1) == Some(block.index)
}

/// Index of the first block in `branch`, i.e. where it leaves the canonical chain.
pub fn divergence(branch: &[Block]) -> Option<u64> {
    branch.first().map(|b| b.index)
}
