//! # Checkpoints
//!
//! Two kinds, two strengths:
//!
//! - **Hardened checkpoints** are `(height, hash)` pairs fixed in the
//!   network parameters (and mirrored into the index store). A chain that
//!   disagrees with one is invalid, full stop.
//!
//! - **The pending checkpoint** is soft: each index node vouches for an
//!   ancestor a fixed depth below it, and the pair rolls forward as the
//!   chain grows. Children must agree with their parent's pair — carrying
//!   it unchanged or superseding it with a later height whose hash matches
//!   the same chain — and reorganizations may never fork below it. That
//!   bias is what keeps deep reorgs from being cheap.

use crate::crypto::hash::BlockHash;
use crate::error::{ChainError, Result};
use crate::index::{BlockIndex, BlockIndexTree};

/// How far below the new block the pending checkpoint trails.
pub const PENDING_CHECKPOINT_DEPTH: u32 = 24;

/// Enforce the most recent hardened checkpoint at or below `height`.
///
/// `parent` is the prospective block's parent; `hash` and `height` are the
/// block's own. Compliance means the block's chain passes through the
/// checkpointed hash at the checkpointed height.
pub fn check_hardened(
    hash: &BlockHash,
    height: u32,
    parent: &BlockIndex,
    tree: &BlockIndexTree,
    checkpoints: &[(u32, BlockHash)],
) -> Result<()> {
    let Some((cp_height, cp_hash)) = checkpoints
        .iter()
        .rev()
        .find(|(h, _)| *h <= height)
        .copied()
    else {
        return Ok(());
    };

    let actual = if cp_height == height {
        Some(*hash)
    } else {
        tree.ancestor_at(parent, cp_height).map(|node| node.hash)
    };

    match actual {
        Some(actual) if actual == cp_hash => Ok(()),
        Some(actual) => Err(ChainError::InvalidContext(format!(
            "hardened checkpoint mismatch at height {cp_height}: chain has {}, requires {}",
            actual.short(),
            cp_hash.short()
        ))),
        None => Err(ChainError::InvalidContext(format!(
            "chain does not reach hardened checkpoint height {cp_height}"
        ))),
    }
}

/// Validate the parent's pending checkpoint against the chain being built
/// on, then compute the pair the new block at `height` will vouch for.
///
/// A child either inherits the parent's pair unchanged or supersedes it
/// with a strictly later height whose hash is the chain's own ancestor at
/// that height; anything else is a fork trying to smuggle in foreign
/// history.
pub fn advance_pending(
    tree: &BlockIndexTree,
    parent: &BlockIndex,
    height: u32,
) -> Result<(u32, BlockHash)> {
    let (pending_height, pending_hash) = parent.pending_checkpoint;

    // The parent's vouched pair must sit on this very chain.
    if !pending_hash.is_zero() {
        match tree.ancestor_at(parent, pending_height) {
            Some(node) if node.hash == pending_hash => {}
            _ => {
                return Err(ChainError::InvalidContext(format!(
                    "pending checkpoint ({pending_height}, {}) is not an ancestor",
                    pending_hash.short()
                )))
            }
        }
    }

    // Supersede once the chain has grown a full depth past the old pair.
    let candidate_height = height.saturating_sub(PENDING_CHECKPOINT_DEPTH);
    if candidate_height > pending_height {
        if let Some(node) = tree.ancestor_at(parent, candidate_height) {
            return Ok((candidate_height, node.hash));
        }
    }
    Ok((pending_height, pending_hash))
}

/// Reorg guard: switching to a branch that forks below the current tip's
/// pending checkpoint is refused.
pub fn fork_allowed(fork_height: u32, tip_pending: (u32, BlockHash)) -> bool {
    tip_pending.1.is_zero() || fork_height >= tip_pending.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::crypto::hash::MerkleHash;

    fn linear(n: usize) -> (BlockIndexTree, Vec<BlockHash>) {
        let mut tree = BlockIndexTree::new();
        let mut hashes = Vec::new();
        let mut prev = BlockHash::ZERO;
        for i in 0..n {
            let header = BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: MerkleHash::ZERO,
                channel: 1,
                height: i as u32,
                bits: 0x807f_ffff,
                nonce: 0,
                time: 1_000 + i as u32 * 50,
            };
            prev = tree.insert(&header, 1, 0).unwrap();
            hashes.push(prev);
        }
        (tree, hashes)
    }

    #[test]
    fn no_checkpoints_means_no_constraint() {
        let (tree, hashes) = linear(3);
        let parent = tree.get(&hashes[2]).unwrap();
        check_hardened(&hashes[2], 3, parent, &tree, &[]).unwrap();
    }

    #[test]
    fn matching_ancestor_passes() {
        let (tree, hashes) = linear(10);
        let parent = tree.get(&hashes[9]).unwrap();
        let cps = vec![(4, hashes[4])];
        check_hardened(&crate::crypto::hash::block_hash(b"new"), 10, parent, &tree, &cps).unwrap();
    }

    #[test]
    fn wrong_ancestor_fails() {
        let (tree, hashes) = linear(10);
        let parent = tree.get(&hashes[9]).unwrap();
        let cps = vec![(4, crate::crypto::hash::block_hash(b"elsewhere"))];
        assert!(matches!(
            check_hardened(&crate::crypto::hash::block_hash(b"new"), 10, parent, &tree, &cps),
            Err(ChainError::InvalidContext(_))
        ));
    }

    #[test]
    fn checkpoint_at_own_height_checks_own_hash() {
        let (tree, hashes) = linear(5);
        let parent = tree.get(&hashes[4]).unwrap();
        let own = crate::crypto::hash::block_hash(b"me");
        check_hardened(&own, 5, parent, &tree, &[(5, own)]).unwrap();
        assert!(check_hardened(
            &crate::crypto::hash::block_hash(b"not me"),
            5,
            parent,
            &tree,
            &[(5, own)]
        )
        .is_err());
    }

    #[test]
    fn only_latest_applicable_checkpoint_is_enforced() {
        let (tree, hashes) = linear(10);
        let parent = tree.get(&hashes[9]).unwrap();
        // The later checkpoint (height 8) wins; an absurd early one is
        // shadowed by it.
        let cps = vec![
            (2, crate::crypto::hash::block_hash(b"wrong")),
            (8, hashes[8]),
        ];
        check_hardened(&crate::crypto::hash::block_hash(b"new"), 10, parent, &tree, &cps).unwrap();
    }

    #[test]
    fn pending_inherits_until_depth_passes() {
        let (tree, hashes) = linear(10);
        let parent = tree.get(&hashes[9]).unwrap();
        // Depth 24 not reached at height 10: inherit the zero pair.
        let pair = advance_pending(&tree, parent, 10).unwrap();
        assert_eq!(pair, (0, BlockHash::ZERO));
    }

    #[test]
    fn pending_advances_past_depth() {
        let (tree, hashes) = linear(30);
        let parent = tree.get(&hashes[29]).unwrap();
        let pair = advance_pending(&tree, parent, 30).unwrap();
        assert_eq!(pair, (30 - PENDING_CHECKPOINT_DEPTH, hashes[(30 - PENDING_CHECKPOINT_DEPTH) as usize]));
    }

    #[test]
    fn foreign_pending_pair_rejected() {
        let (mut tree, hashes) = linear(30);
        let parent_hash = hashes[29];
        tree.get_mut(&parent_hash).unwrap().pending_checkpoint =
            (5, crate::crypto::hash::block_hash(b"foreign"));
        let parent = tree.get(&parent_hash).unwrap();
        assert!(matches!(
            advance_pending(&tree, parent, 30),
            Err(ChainError::InvalidContext(_))
        ));
    }

    #[test]
    fn fork_guard_respects_pending_height() {
        let vouched = (10, crate::crypto::hash::block_hash(b"cp"));
        assert!(fork_allowed(10, vouched));
        assert!(fork_allowed(15, vouched));
        assert!(!fork_allowed(9, vouched));
        // No pending checkpoint yet: anything goes.
        assert!(fork_allowed(0, (0, BlockHash::ZERO)));
    }
}
