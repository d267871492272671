//! # Block index tree
//!
//! The block chain is a tree rooted at genesis: every block may have many
//! children, but only one child sits on the elected main path. The
//! original design threads raw back/forward pointers through the nodes;
//! here the tree is an owning map from hash to node, each node stores its
//! parent's *hash*, and the main-chain child is a hash as well. No node
//! owns another, so there is nothing cyclic to leak or to fight the
//! borrow checker over.
//!
//! The tree is a plain data structure with no locking of its own; the
//! chain manager serializes access behind the process-wide chain mutex.

pub mod disk;

use std::collections::HashMap;

use crate::block::{BlockHeader, Channel};
use crate::config::{CHANNEL_COUNT, MEDIAN_TIME_SPAN, RESERVE_SLOTS};
use crate::crypto::hash::BlockHash;
use crate::error::{ChainError, Result};
use crate::validate::trust::block_trust;

pub use disk::DiskBlockIndex;

/// Block index flag bits.
pub mod flags {
    /// The block's proof is a stake kernel.
    pub const PROOF_OF_STAKE: u32 = 1 << 0;
    /// The block failed connection once; forks building on it are refused.
    pub const FAILED: u32 = 1 << 1;
}

// ---------------------------------------------------------------------------
// BlockIndex
// ---------------------------------------------------------------------------

/// In-memory index node: where the block lives on disk, its accumulated
/// consensus weight, the monetary rollups, and a copy of the header fields
/// needed without disk I/O.
#[derive(Clone, Debug)]
pub struct BlockIndex {
    pub hash: BlockHash,
    /// Parent hash; `None` only for genesis.
    pub prev: Option<BlockHash>,
    /// Main-chain child hash; `None` off the main chain and at the tip.
    pub next: Option<BlockHash>,

    /// Block file id and byte offset of the stored block.
    pub file: u32,
    pub offset: u64,

    /// Cumulative trust from genesis through this block.
    pub chain_trust: u64,
    /// New money this block minted (set at connect time).
    pub mint: i64,
    /// Running supply after this block.
    pub supply: i64,
    /// Height counted along this block's own channel.
    pub channel_height: u32,
    /// Reserve balances released per channel; slot 3 is held for a future
    /// channel and never written.
    pub released_reserve: [i64; RESERVE_SLOTS],
    /// Coinbase rewards credited per channel.
    pub coinbase_rewards: [i64; CHANNEL_COUNT],
    /// The soft checkpoint this block vouches for.
    pub pending_checkpoint: (u32, BlockHash),
    pub flags: u32,
    /// Stake-kernel accumulator, folded forward block to block.
    pub stake_modifier: u64,

    // Header copy.
    pub version: u32,
    pub merkle_root: crate::crypto::hash::MerkleHash,
    pub channel: u32,
    pub height: u32,
    pub bits: u32,
    pub nonce: u64,
    pub time: u32,
}

impl BlockIndex {
    pub fn channel(&self) -> Option<Channel> {
        Channel::from_u32(self.channel)
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & flags::PROOF_OF_STAKE != 0
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    pub fn is_failed(&self) -> bool {
        self.flags & flags::FAILED != 0
    }

    /// Rebuild the header this node was created from.
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_hash: self.prev.unwrap_or(BlockHash::ZERO),
            merkle_root: self.merkle_root,
            channel: self.channel,
            height: self.height,
            bits: self.bits,
            nonce: self.nonce,
            time: self.time,
        }
    }

    /// Internal consistency: the header copy must re-hash to the key this
    /// node is stored under. Guards against index-store corruption.
    pub fn check_index(&self) -> bool {
        self.header().hash() == self.hash
    }
}

// ---------------------------------------------------------------------------
// BlockIndexTree
// ---------------------------------------------------------------------------

/// Owning map of every known block index node.
#[derive(Debug, Default)]
pub struct BlockIndexTree {
    nodes: HashMap<BlockHash, BlockIndex>,
}

impl BlockIndexTree {
    pub fn new() -> BlockIndexTree {
        BlockIndexTree {
            nodes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&BlockIndex> {
        self.nodes.get(hash)
    }

    pub fn get_mut(&mut self, hash: &BlockHash) -> Option<&mut BlockIndex> {
        self.nodes.get_mut(hash)
    }

    /// Create a node for `header`, link it to its parent, and fold the
    /// rollups forward.
    ///
    /// The parent must already be present (the chain manager guarantees it;
    /// out-of-order arrivals wait in the orphan pool). Inserting a hash
    /// that already exists is a no-op returning the existing key.
    pub fn insert(&mut self, header: &BlockHeader, file: u32, offset: u64) -> Result<BlockHash> {
        let hash = header.hash();
        if self.nodes.contains_key(&hash) {
            return Ok(hash);
        }

        let channel = header
            .channel()
            .ok_or_else(|| ChainError::Internal(format!("indexing unknown channel {}", header.channel)))?;

        let (prev, parent) = if header.prev_hash.is_zero() {
            (None, None)
        } else {
            let parent = self.nodes.get(&header.prev_hash).ok_or_else(|| {
                ChainError::MissingParent(header.prev_hash.short())
            })?;
            (Some(header.prev_hash), Some(parent))
        };

        let parent_trust = parent.map(|p| p.chain_trust).unwrap_or(0);
        let parent_supply = parent.map(|p| p.supply).unwrap_or(0);
        let parent_reserve = parent.map(|p| p.released_reserve).unwrap_or([0; RESERVE_SLOTS]);
        let parent_rewards = parent
            .map(|p| p.coinbase_rewards)
            .unwrap_or([0; CHANNEL_COUNT]);
        let parent_checkpoint = parent
            .map(|p| p.pending_checkpoint)
            .unwrap_or((0, BlockHash::ZERO));
        let parent_modifier = parent.map(|p| p.stake_modifier).unwrap_or(0);

        let channel_height = 1 + parent
            .and_then(|p| self.last_of_channel(p, channel))
            .map(|i| i.channel_height)
            .unwrap_or(0);

        let mut node_flags = 0;
        if channel.is_proof_of_stake() {
            node_flags |= flags::PROOF_OF_STAKE;
        }

        // Fold the block identity into the running stake modifier so each
        // stake kernel sees an unpredictable, consensus-agreed seed.
        let stake_modifier = if channel.is_proof_of_stake() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&hash.0[..8]);
            parent_modifier.rotate_left(1) ^ u64::from_le_bytes(word)
        } else {
            parent_modifier
        };

        let node = BlockIndex {
            hash,
            prev,
            next: None,
            file,
            offset,
            chain_trust: parent_trust.saturating_add(block_trust(header)),
            mint: 0,
            supply: parent_supply,
            channel_height,
            released_reserve: parent_reserve,
            coinbase_rewards: parent_rewards,
            pending_checkpoint: parent_checkpoint,
            flags: node_flags,
            stake_modifier,
            version: header.version,
            merkle_root: header.merkle_root,
            channel: header.channel,
            height: header.height,
            bits: header.bits,
            nonce: header.nonce,
            time: header.time,
        };

        self.nodes.insert(hash, node);
        Ok(hash)
    }

    /// Insert a node reloaded from the index store verbatim, rollups and
    /// pointers included.
    pub fn insert_loaded(&mut self, node: BlockIndex) {
        self.nodes.insert(node.hash, node);
    }

    // -- Traversals ---------------------------------------------------------

    /// Walk back from `start` (inclusive) to the most recent index of the
    /// requested proof kind.
    pub fn last_of_kind<'a>(
        &'a self,
        start: &'a BlockIndex,
        proof_of_stake: bool,
    ) -> Option<&'a BlockIndex> {
        let mut cursor = Some(start);
        while let Some(node) = cursor {
            if node.is_proof_of_stake() == proof_of_stake {
                return Some(node);
            }
            cursor = node.prev.as_ref().and_then(|h| self.nodes.get(h));
        }
        None
    }

    /// Walk back from `start` (inclusive) to the most recent index on the
    /// given channel.
    pub fn last_of_channel<'a>(
        &'a self,
        start: &'a BlockIndex,
        channel: Channel,
    ) -> Option<&'a BlockIndex> {
        let mut cursor = Some(start);
        while let Some(node) = cursor {
            if node.channel == channel.as_u32() {
                return Some(node);
            }
            cursor = node.prev.as_ref().and_then(|h| self.nodes.get(h));
        }
        None
    }

    /// The ancestor of `start` at exactly `height`, following parent links.
    pub fn ancestor_at<'a>(&'a self, start: &'a BlockIndex, height: u32) -> Option<&'a BlockIndex> {
        if height > start.height {
            return None;
        }
        let mut cursor = start;
        while cursor.height > height {
            cursor = self.nodes.get(cursor.prev.as_ref()?)?;
        }
        Some(cursor)
    }

    /// Median of the last [`MEDIAN_TIME_SPAN`] ancestor timestamps,
    /// `start` included.
    pub fn median_time_past(&self, start: &BlockIndex) -> u32 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = Some(start);
        while let Some(node) = cursor {
            times.push(node.time);
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            cursor = node.prev.as_ref().and_then(|h| self.nodes.get(h));
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Lowest common ancestor of two nodes: walk the deeper side up until
    /// heights match, then both in lockstep.
    pub fn lowest_common_ancestor(&self, a: &BlockHash, b: &BlockHash) -> Option<BlockHash> {
        let mut x = self.nodes.get(a)?;
        let mut y = self.nodes.get(b)?;
        while x.height > y.height {
            x = self.nodes.get(x.prev.as_ref()?)?;
        }
        while y.height > x.height {
            y = self.nodes.get(y.prev.as_ref()?)?;
        }
        while x.hash != y.hash {
            x = self.nodes.get(x.prev.as_ref()?)?;
            y = self.nodes.get(y.prev.as_ref()?)?;
        }
        Some(x.hash)
    }

    /// Hashes from `from` (inclusive) back to `ancestor` (exclusive),
    /// tip-first. Empty when `from == ancestor`.
    pub fn path_down_to(&self, from: &BlockHash, ancestor: &BlockHash) -> Result<Vec<BlockHash>> {
        let mut path = Vec::new();
        let mut cursor = *from;
        while cursor != *ancestor {
            let node = self
                .nodes
                .get(&cursor)
                .ok_or_else(|| ChainError::Internal(format!("broken parent chain at {}", cursor.short())))?;
            path.push(cursor);
            cursor = node.prev.ok_or_else(|| {
                ChainError::Internal("walked past genesis looking for fork point".into())
            })?;
        }
        Ok(path)
    }

    /// A node is on the main chain when its forward pointer is set or it
    /// is the tip itself.
    pub fn is_in_main_chain(&self, hash: &BlockHash, tip: &BlockHash) -> bool {
        match self.nodes.get(hash) {
            Some(node) => node.next.is_some() || hash == tip,
            None => false,
        }
    }

    /// Iterate every node (startup checks, tests).
    pub fn iter(&self) -> impl Iterator<Item = &BlockIndex> {
        self.nodes.values()
    }
}
