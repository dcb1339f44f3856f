//! Fork-choice rules.
//!
//! Two rules coexist and are deliberately not unified:
//! - fork resolution ([`resolve`]) picks the branch with the most cumulative
//!   work once enough forked blocks have accumulated;
//! - whole-chain replacement ([`should_replace`]) accepts any valid chain that
//!   is strictly longer, ignoring work.

use crate::{
    error::ReplaceRejection,
    fork::{divergence, ForkSet},
    validate::{validate_chain, validate_link},
    Block,
};
use num_bigint::BigUint;
use serde::Serialize;
use tracing::{info, warn};

/// `floor(2^256 / (difficulty + 1))`. Lower difficulty yields more nominal work;
/// nodes must agree on this exact arithmetic for ties to break the same way.
pub fn block_work(difficulty: u32) -> BigUint {
    (BigUint::from(1u8) << 256usize) / BigUint::from(u64::from(difficulty) + 1)
}

pub fn branch_work(branch: &[Block]) -> BigUint {
    branch.iter().map(|b| block_work(b.difficulty)).sum()
}

/// The outcome of a fork resolution round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Branch `branch` won and replaced the canonical chain from `divergence` on.
    Spliced {
        branch: usize,
        divergence: u64,
        old_len: usize,
        new_len: usize,
    },
    /// No branch could be attached to the canonical prefix; all were dropped.
    Discarded { branches: usize },
}

/// `canonical[..divergence] ++ branch`, if that forms a valid chain.
///
/// The canonical prefix is trusted; only the junction and the branch itself
/// are checked.
pub fn splice(canonical: &[Block], branch: &[Block]) -> Option<Vec<Block>> {
    let div = usize::try_from(divergence(branch)?).ok()?;
    if div == 0 || div > canonical.len() {
        return None;
    }
    let mut chain = Vec::with_capacity(div + branch.len());
    chain.extend_from_slice(&canonical[..div]);
    chain.extend_from_slice(branch);
    for pair in chain[div - 1..].windows(2) {
        validate_link(&pair[0], &pair[1]).ok()?;
    }
    Some(chain)
}

/// Index of the branch with strictly the greatest work among those that
/// splice onto `canonical`. The first branch to reach the maximum wins.
pub fn select_winner(branches: &[Vec<Block>], canonical: &[Block]) -> Option<usize> {
    let mut best: Option<(usize, BigUint)> = None;
    for (i, branch) in branches.iter().enumerate() {
        if splice(canonical, branch).is_none() {
            continue;
        }
        let work = branch_work(branch);
        if best.as_ref().is_none_or(|(_, w)| work > *w) {
            best = Some((i, work));
        }
    }
    best.map(|(i, _)| i)
}

/// Run a resolution round if the fork set holds at least `fork_lim` blocks.
///
/// On resolution the fork set is always cleared. The canonical chain is only
/// replaced when some branch splices cleanly.
pub fn resolve(
    canonical: &mut Vec<Block>,
    forks: &mut ForkSet,
    fork_lim: usize,
) -> Option<Resolution> {
    if forks.is_empty() || forks.total_blocks() < fork_lim {
        return None;
    }

    let resolution = match select_winner(forks.branches(), canonical) {
        Some(i) => {
            let branch = &forks.branches()[i];
            let div = divergence(branch).unwrap_or_default();
            match splice(canonical, branch) {
                Some(chain) => {
                    let old_len = canonical.len();
                    *canonical = chain;
                    info!(
                        branch = i,
                        divergence = div,
                        old_len,
                        new_len = canonical.len(),
                        "fork resolved"
                    );
                    Resolution::Spliced {
                        branch: i,
                        divergence: div,
                        old_len,
                        new_len: canonical.len(),
                    }
                }
                None => Resolution::Discarded {
                    branches: forks.branches().len(),
                },
            }
        }
        None => {
            warn!(
                branches = forks.branches().len(),
                "no fork branch attaches to the canonical chain; discarding forks"
            );
            Resolution::Discarded {
                branches: forks.branches().len(),
            }
        }
    };
    forks.clear();
    Some(resolution)
}

/// Whole-chain replacement rule: `incoming` must be valid and strictly longer.
pub fn should_replace(local: &[Block], incoming: &[Block]) -> Result<(), ReplaceRejection> {
    if incoming.len() <= local.len() {
        return Err(ReplaceRejection::NotLonger {
            received: incoming.len(),
            local: local.len(),
        });
    }
    validate_chain(incoming)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::genesis_block, error::ValidationError, Transaction};

    fn child(parent: &Block, tag: &str, difficulty: u32) -> Block {
        Block::template(
            parent.index + 1,
            parent.hash.clone(),
            vec![Transaction::coinbase(tag, 1.0)],
            tag,
            difficulty,
        )
        .seal()
    }

    fn extend(parent: &Block, n: usize, tag: &str, difficulty: u32) -> Vec<Block> {
        let mut out: Vec<Block> = Vec::new();
        for _ in 0..n {
            let p = out.last().unwrap_or(parent).clone();
            out.push(child(&p, tag, difficulty));
        }
        out
    }

    fn canonical(len: usize) -> Vec<Block> {
        let mut chain = vec![genesis_block()];
        chain.extend(extend(&chain[0].clone(), len - 1, "canon", 0));
        chain
    }

    #[test]
    fn block_work_matches_formula() {
        let two_256 = BigUint::from(1u8) << 256usize;
        assert_eq!(block_work(0), two_256);
        assert_eq!(block_work(1), &two_256 / BigUint::from(2u8));
        assert_eq!(block_work(3), &two_256 / BigUint::from(4u8));
        assert!(block_work(2) > block_work(5));
    }

    #[test]
    fn branch_work_sums_blocks() {
        let chain = canonical(1);
        let branch = extend(&chain[0], 3, "x", 1);
        assert_eq!(branch_work(&branch), block_work(1) * 3u32);
        assert_eq!(branch_work(&[]), BigUint::from(0u8));
    }

    #[test]
    fn lower_difficulty_branch_carries_more_work() {
        let chain = canonical(2);
        let easy = extend(&chain[1], 2, "easy", 0);
        let hard = extend(&chain[1], 3, "hard", 4);
        let branches = vec![hard, easy];
        // 2 * 2^256 beats 3 * 2^256 / 5.
        assert_eq!(select_winner(&branches, &chain), Some(1));
    }

    #[test]
    fn exact_ties_go_to_the_first_branch() {
        let chain = canonical(2);
        let a = extend(&chain[1], 2, "a", 1);
        let b = extend(&chain[1], 2, "b", 1);
        assert_eq!(select_winner(&[a.clone(), b.clone()], &chain), Some(0));
        assert_eq!(select_winner(&[b, a], &chain), Some(0));
    }

    #[test]
    fn selection_is_deterministic() {
        let chain = canonical(3);
        let branches = vec![
            chain[2..].to_vec(),
            extend(&chain[1], 2, "a", 2),
            extend(&chain[1], 1, "b", 0),
        ];
        let first = select_winner(&branches, &chain);
        for _ in 0..10 {
            assert_eq!(select_winner(&branches, &chain), first);
        }
    }

    #[test]
    fn unattached_branches_are_not_eligible() {
        let chain = canonical(2);
        let orphan = vec![Block::template(5, "nowhere", vec![], "o", 0).seal()];
        let genesis_claim = vec![genesis_block()];
        assert_eq!(select_winner(&[orphan.clone()], &chain), None);
        assert_eq!(select_winner(&[genesis_claim], &chain), None);
        let good = extend(&chain[1], 1, "g", 3);
        assert_eq!(select_winner(&[orphan, good], &chain), Some(1));
    }

    #[test]
    fn resolve_waits_for_the_limit() {
        let mut chain = canonical(2);
        let mut forks = ForkSet::new();
        forks.route(child(&chain[0], "rival", 0), &chain);
        assert_eq!(forks.total_blocks(), 2);
        assert_eq!(resolve(&mut chain, &mut forks, 3), None);
        assert_eq!(forks.total_blocks(), 2);
    }

    #[test]
    fn resolve_splices_the_heaviest_branch() {
        let mut chain = canonical(3);
        let original = chain.clone();
        let mut forks = ForkSet::new();
        let rival = child(&chain[1], "rival", 0);
        let rival2 = child(&rival, "rival", 0);
        forks.route(rival.clone(), &chain);
        forks.route(rival2.clone(), &chain);

        let res = resolve(&mut chain, &mut forks, 3).unwrap();
        assert_eq!(
            res,
            Resolution::Spliced {
                branch: 0,
                divergence: 2,
                old_len: 3,
                new_len: 4
            }
        );
        assert!(forks.is_empty());
        assert_eq!(&chain[..2], &original[..2]);
        assert_eq!(&chain[2..], &[rival, rival2]);
        assert!(crate::is_valid(&chain));
    }

    #[test]
    fn resolve_keeps_canonical_when_it_is_heavier() {
        let mut chain = canonical(2);
        chain.extend(extend(&chain[1].clone(), 2, "canon", 0));
        let original = chain.clone();
        let mut forks = ForkSet::new();
        forks.route(child(&chain[1], "rival", 5), &chain);

        let res = resolve(&mut chain, &mut forks, 3).unwrap();
        assert!(matches!(res, Resolution::Spliced { branch: 1, .. }));
        assert_eq!(chain, original);
    }

    #[test]
    fn resolve_discards_when_nothing_attaches() {
        let mut chain = canonical(2);
        let original = chain.clone();
        let mut forks = ForkSet::new();
        forks.route(Block::template(8, "x", vec![], "o", 0).seal(), &chain);
        forks.route(Block::template(9, "y", vec![], "o", 0).seal(), &chain);

        let res = resolve(&mut chain, &mut forks, 2).unwrap();
        assert_eq!(res, Resolution::Discarded { branches: 2 });
        assert!(forks.is_empty());
        assert_eq!(chain, original);
    }

    #[test]
    fn replacement_requires_strictly_longer_valid_chain() {
        let local = canonical(3);
        let longer = {
            let mut c = local.clone();
            c.extend(extend(&local[2], 1, "peer", 9));
            c
        };
        assert!(should_replace(&local, &longer).is_ok());
        assert_eq!(
            should_replace(&local, &local),
            Err(ReplaceRejection::NotLonger {
                received: 3,
                local: 3
            })
        );
        assert!(should_replace(&longer, &local).is_err());

        let mut broken = longer.clone();
        broken[2].previous_hash = "zz".into();
        assert_eq!(
            should_replace(&local, &broken),
            Err(ReplaceRejection::Invalid(ValidationError::HashMismatch {
                index: 2
            }))
        );
    }

    #[test]
    fn replacement_ignores_work() {
        // A longer chain of maximal difficulty still wins over a shorter easy one.
        let local = canonical(3);
        let mut peer = vec![genesis_block()];
        peer.extend(extend(&peer[0].clone(), 3, "peer", 60));
        assert!(branch_work(&peer[1..]) < branch_work(&local[1..]));
        assert!(should_replace(&local, &peer).is_ok());
    }
}
