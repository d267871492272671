//! # Index store
//!
//! Durable ordered key/value store over sled, mapping block hashes to
//! [`DiskBlockIndex`] records plus a handful of singletons. Everything
//! lives in one named tree so that a single [`sled::Batch`] covers an
//! entire acceptance — the new index record, any reorg pointer updates,
//! and the best-hash singleton land atomically or not at all.
//!
//! ## Keyspace
//!
//! | Prefix | Key            | Value                |
//! |--------|----------------|----------------------|
//! | `b`    | block hash     | `DiskBlockIndex`     |
//! | `h`    | —              | best block hash      |
//! | `g`    | —              | genesis hash         |
//! | `c`    | height (BE u32)| hardened checkpoint  |
//!
//! Heights in checkpoint keys are big-endian so sled's lexicographic
//! order matches numeric order.

use std::path::Path;

use crate::crypto::hash::{BlockHash, BLOCK_HASH_LEN};
use crate::error::{ChainError, Result};
use crate::index::DiskBlockIndex;

const PREFIX_BLOCK: u8 = b'b';
const KEY_BEST: &[u8] = b"h";
const KEY_GENESIS: &[u8] = b"g";
const PREFIX_CHECKPOINT: u8 = b'c';

fn block_key(hash: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + BLOCK_HASH_LEN);
    key.push(PREFIX_BLOCK);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn checkpoint_key(height: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = PREFIX_CHECKPOINT;
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

fn decode_hash(bytes: &[u8], what: &str) -> Result<BlockHash> {
    let arr: [u8; BLOCK_HASH_LEN] = bytes
        .try_into()
        .map_err(|_| ChainError::IndexCorrupt(format!("{what} has bad length {}", bytes.len())))?;
    Ok(BlockHash(arr))
}

// ---------------------------------------------------------------------------
// IndexBatch
// ---------------------------------------------------------------------------

/// Write batch staged against the index store. All writes in one batch
/// become visible atomically at [`IndexStore::commit`]; a crash in between
/// shows none of them.
#[derive(Default)]
pub struct IndexBatch {
    inner: sled::Batch,
}

impl IndexBatch {
    pub fn new() -> IndexBatch {
        IndexBatch::default()
    }

    /// Stage a block index record (always the long form).
    pub fn put_index(&mut self, hash: &BlockHash, record: &DiskBlockIndex) {
        self.inner.insert(block_key(hash), record.encode_long());
    }

    /// Stage the best-chain tip singleton.
    pub fn put_best(&mut self, hash: &BlockHash) {
        self.inner.insert(KEY_BEST, hash.as_bytes().as_slice());
    }

    /// Stage the genesis singleton (written once, at chain creation).
    pub fn put_genesis(&mut self, hash: &BlockHash) {
        self.inner.insert(KEY_GENESIS, hash.as_bytes().as_slice());
    }

    /// Stage a hardened checkpoint.
    pub fn put_checkpoint(&mut self, height: u32, hash: &BlockHash) {
        self.inner
            .insert(&checkpoint_key(height)[..], hash.as_bytes().as_slice());
    }
}

// ---------------------------------------------------------------------------
// IndexStore
// ---------------------------------------------------------------------------

/// The durable block index.
pub struct IndexStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl IndexStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<IndexStore> {
        let db = sled::open(path)?;
        let tree = db.open_tree("chain")?;
        Ok(IndexStore { db, tree })
    }

    /// In-memory store for tests; nothing touches the filesystem and the
    /// data dies with the value.
    pub fn temporary() -> Result<IndexStore> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("chain")?;
        Ok(IndexStore { db, tree })
    }

    /// Apply a batch atomically and flush it to stable storage.
    pub fn commit(&self, batch: IndexBatch) -> Result<()> {
        self.tree.apply_batch(batch.inner)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_index(&self, hash: &BlockHash) -> Result<Option<DiskBlockIndex>> {
        match self.tree.get(block_key(hash))? {
            Some(bytes) => {
                let record = DiskBlockIndex::decode(&bytes)
                    .map_err(|e| ChainError::IndexCorrupt(format!("index record for {}: {e}", hash.short())))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn best_hash(&self) -> Result<Option<BlockHash>> {
        match self.tree.get(KEY_BEST)? {
            Some(bytes) => Ok(Some(decode_hash(&bytes, "best hash")?)),
            None => Ok(None),
        }
    }

    pub fn genesis_hash(&self) -> Result<Option<BlockHash>> {
        match self.tree.get(KEY_GENESIS)? {
            Some(bytes) => Ok(Some(decode_hash(&bytes, "genesis hash")?)),
            None => Ok(None),
        }
    }

    /// The hardened checkpoint stored at exactly `height`, if any.
    pub fn checkpoint(&self, height: u32) -> Result<Option<BlockHash>> {
        match self.tree.get(checkpoint_key(height))? {
            Some(bytes) => Ok(Some(decode_hash(&bytes, "checkpoint")?)),
            None => Ok(None),
        }
    }

    /// All stored hardened checkpoints, ascending by height.
    pub fn checkpoints(&self) -> Result<Vec<(u32, BlockHash)>> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix([PREFIX_CHECKPOINT]) {
            let (key, value) = entry?;
            if key.len() != 5 {
                return Err(ChainError::IndexCorrupt("bad checkpoint key".into()));
            }
            let height = u32::from_be_bytes(key[1..].try_into().unwrap());
            out.push((height, decode_hash(&value, "checkpoint")?));
        }
        Ok(out)
    }

    /// Iterate every stored block index record, in key order. Startup uses
    /// this to rebuild the in-memory tree.
    pub fn iter_indexes(&self) -> impl Iterator<Item = Result<(BlockHash, DiskBlockIndex)>> + '_ {
        self.tree.scan_prefix([PREFIX_BLOCK]).map(|entry| {
            let (key, value) = entry?;
            if key.len() != 1 + BLOCK_HASH_LEN {
                return Err(ChainError::IndexCorrupt("bad block index key".into()));
            }
            let hash = decode_hash(&key[1..], "block index key")?;
            let record = DiskBlockIndex::decode(&value)
                .map_err(|e| ChainError::IndexCorrupt(format!("index record for {}: {e}", hash.short())))?;
            Ok((hash, record))
        })
    }

    /// Number of block index records (tests and diagnostics).
    pub fn index_count(&self) -> usize {
        self.tree.scan_prefix([PREFIX_BLOCK]).count()
    }
}
