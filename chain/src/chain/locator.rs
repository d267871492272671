//! # Block locator
//!
//! A compact "where am I on the chain?" descriptor for gossip. Starting at
//! a node, hashes are pushed walking back one block at a time; after ten
//! entries the step doubles each push, and genesis always closes the list.
//! Dense near the tip, geometric toward the root: a peer on the same
//! branch matches early, a peer on a diverged branch still finds a common
//! trunk in `O(log n)` entries.

use crate::codec;
use crate::crypto::hash::BlockHash;
use crate::error::Result;
use crate::index::{BlockIndex, BlockIndexTree};

/// Entries walked back singly before the step starts doubling.
const DENSE_STEPS: usize = 10;

/// Ordered hash list densifying toward the tip.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockLocator {
    have: Vec<BlockHash>,
}

impl BlockLocator {
    /// Build a locator starting at `index`, walking toward genesis.
    pub fn new(tree: &BlockIndexTree, index: &BlockIndex) -> BlockLocator {
        let mut have = Vec::with_capacity(32);
        let mut step: u32 = 1;
        let mut cursor = Some(index);

        while let Some(node) = cursor {
            have.push(node.hash);
            if node.height == 0 {
                return BlockLocator { have };
            }
            if have.len() >= DENSE_STEPS {
                step = step.saturating_mul(2);
            }
            let next_height = node.height.saturating_sub(step);
            cursor = tree.ancestor_at(node, next_height);
        }
        BlockLocator { have }
    }

    /// Wrap an explicit hash list (decoded from the wire).
    pub fn from_hashes(have: Vec<BlockHash>) -> BlockLocator {
        BlockLocator { have }
    }

    pub fn is_null(&self) -> bool {
        self.have.is_empty()
    }

    /// Number of entries carried.
    pub fn distance_back(&self) -> usize {
        self.have.len()
    }

    pub fn hashes(&self) -> &[BlockHash] {
        &self.have
    }

    /// The first listed hash present in the tree; `None` only when the
    /// trees share no history at all (not even genesis).
    pub fn resolve<'a>(&self, tree: &'a BlockIndexTree) -> Option<&'a BlockIndex> {
        self.have.iter().find_map(|hash| tree.get(hash))
    }

    /// Height of the resolved node, 0 when nothing resolves.
    pub fn height(&self, tree: &BlockIndexTree) -> u32 {
        self.resolve(tree).map(|node| node.height).unwrap_or(0)
    }

    // -- Wire form ----------------------------------------------------------

    pub fn encode(&self) -> Vec<u8> {
        let mut out = bytes::BytesMut::with_capacity(4 + self.have.len() * 128);
        codec::put_u32(&mut out, self.have.len() as u32);
        for hash in &self.have {
            codec::put_block_hash(&mut out, hash);
        }
        out.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<BlockLocator> {
        let mut buf = bytes;
        let count = codec::get_count(&mut buf, 128, "locator")?;
        let mut have = Vec::with_capacity(count);
        for _ in 0..count {
            have.push(codec::get_block_hash(&mut buf, "locator hash")?);
        }
        codec::expect_eof(buf, "locator")?;
        Ok(BlockLocator { have })
    }
}
