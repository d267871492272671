//! # Orphan pool
//!
//! Syntactically valid blocks whose parent is not yet in the index wait
//! here. The pool is bounded both by entry count and by total serialized
//! bytes; when either bound is hit the oldest orphan is evicted first — an
//! orphan that has waited longest is the least likely to ever connect.
//!
//! Two maps: hash → block, and missing-parent hash → the set of children
//! waiting for it. [`OrphanPool::orphan_root`] walks parent links *within
//! the pool* to find the earliest missing ancestor, which is the hash
//! worth requesting from the peer that sent the orphan.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use crate::block::Block;
use crate::crypto::hash::BlockHash;

/// Bounded pool of parent-less blocks.
pub struct OrphanPool {
    blocks: HashMap<BlockHash, Block>,
    /// Missing parent hash → children waiting on it. BTreeSet keeps
    /// cascade order deterministic.
    by_parent: HashMap<BlockHash, BTreeSet<BlockHash>>,
    /// Insertion order, oldest first, for eviction.
    arrival: VecDeque<BlockHash>,
    total_bytes: usize,
    max_blocks: usize,
    max_bytes: usize,
}

impl OrphanPool {
    pub fn new(max_blocks: usize, max_bytes: usize) -> OrphanPool {
        OrphanPool {
            blocks: HashMap::new(),
            by_parent: HashMap::new(),
            arrival: VecDeque::new(),
            total_bytes: 0,
            max_blocks,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Park a block. Duplicates are ignored. Evicts oldest entries until
    /// both bounds hold.
    pub fn insert(&mut self, block: Block) {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return;
        }

        let size = block.encode_full().len();
        self.by_parent
            .entry(block.header.prev_hash)
            .or_default()
            .insert(hash);
        self.arrival.push_back(hash);
        self.total_bytes += size;
        self.blocks.insert(hash, block);

        while self.blocks.len() > self.max_blocks || self.total_bytes > self.max_bytes {
            let Some(oldest) = self.arrival.front().copied() else {
                break;
            };
            self.remove(&oldest);
            debug!(evicted = %oldest.short(), "orphan pool bound hit, evicted oldest");
        }
    }

    /// Remove and return every orphan whose parent is `parent`.
    pub fn take_children(&mut self, parent: &BlockHash) -> Vec<Block> {
        let Some(children) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            if let Some(block) = self.remove(&child) {
                out.push(block);
            }
        }
        out
    }

    /// Walk back through the pool from `hash` to the earliest ancestor
    /// still orphaned, and return that ancestor's hash.
    pub fn orphan_root(&self, hash: &BlockHash) -> BlockHash {
        let mut cursor = *hash;
        while let Some(block) = self.blocks.get(&cursor) {
            if self.blocks.contains_key(&block.header.prev_hash) {
                cursor = block.header.prev_hash;
            } else {
                return cursor;
            }
        }
        cursor
    }

    /// The hash an orphan chain is waiting for: the orphan root's missing
    /// parent. This is what to request from the source peer.
    pub fn wanted_by_orphan(&self, hash: &BlockHash) -> Option<BlockHash> {
        let root = self.orphan_root(hash);
        self.blocks.get(&root).map(|b| b.header.prev_hash)
    }

    fn remove(&mut self, hash: &BlockHash) -> Option<Block> {
        let block = self.blocks.remove(hash)?;
        self.total_bytes -= block.encode_full().len();
        if let Some(set) = self.by_parent.get_mut(&block.header.prev_hash) {
            set.remove(hash);
            if set.is_empty() {
                self.by_parent.remove(&block.header.prev_hash);
            }
        }
        self.arrival.retain(|h| h != hash);
        Some(block)
    }
}
