//! # Disk index records
//!
//! [`DiskBlockIndex`] is the serialized shadow of a [`BlockIndex`]: the
//! in-memory parent/child *hashes* replace pointer-chasing, and the record
//! round-trips through the index store's key/value bytes. Two wire
//! variants share one layout, selected by a leading flag byte:
//!
//! - **short** — linkage, disk position, monetary fields, and the header
//!   copy. Enough to rebuild the tree shape.
//! - **long** — additionally the per-channel rollups and cumulative trust,
//!   so a reload never has to replay the chain to recover them. The index
//!   store always writes this form.
//!
//! The pending checkpoint is deliberately absent: it is soft state,
//! rebuilt as new blocks arrive.

use bytes::BytesMut;

use crate::block::BlockHeader;
use crate::codec;
use crate::config::{CHANNEL_COUNT, RESERVE_SLOTS};
use crate::crypto::hash::{BlockHash, MerkleHash};
use crate::error::{ChainError, Result};
use crate::index::BlockIndex;

const VARIANT_SHORT: u8 = 0;
const VARIANT_LONG: u8 = 1;

/// Number of reserve slots that hit the wire. Slot 3 of the in-memory
/// array is held for a future channel and is not serialized.
const RESERVE_WIRE_SLOTS: usize = 3;

/// Serialized form of a block index node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskBlockIndex {
    pub prev_hash: BlockHash,
    pub next_hash: BlockHash,
    pub file: u32,
    pub offset: u64,
    pub mint: i64,
    pub supply: i64,
    pub flags: u32,
    pub stake_modifier: u64,

    // Long-form extras; zero when decoded from a short record.
    pub channel_height: u32,
    pub chain_trust: u64,
    pub coinbase_rewards: [i64; CHANNEL_COUNT],
    pub released_reserve: [i64; RESERVE_WIRE_SLOTS],

    // Header copy.
    pub version: u32,
    pub merkle_root: MerkleHash,
    pub channel: u32,
    pub height: u32,
    pub bits: u32,
    pub nonce: u64,
    pub time: u32,
}

impl DiskBlockIndex {
    /// Project an in-memory node into its disk record.
    pub fn from_index(node: &BlockIndex) -> DiskBlockIndex {
        DiskBlockIndex {
            prev_hash: node.prev.unwrap_or(BlockHash::ZERO),
            next_hash: node.next.unwrap_or(BlockHash::ZERO),
            file: node.file,
            offset: node.offset,
            mint: node.mint,
            supply: node.supply,
            flags: node.flags,
            stake_modifier: node.stake_modifier,
            channel_height: node.channel_height,
            chain_trust: node.chain_trust,
            coinbase_rewards: node.coinbase_rewards,
            released_reserve: [
                node.released_reserve[0],
                node.released_reserve[1],
                node.released_reserve[2],
            ],
            version: node.version,
            merkle_root: node.merkle_root,
            channel: node.channel,
            height: node.height,
            bits: node.bits,
            nonce: node.nonce,
            time: node.time,
        }
    }

    /// Rebuild the in-memory node. The hash is recomputed from the header
    /// copy, which doubles as a corruption check at load time.
    pub fn into_index(self) -> BlockIndex {
        let mut released_reserve = [0i64; RESERVE_SLOTS];
        released_reserve[..RESERVE_WIRE_SLOTS].copy_from_slice(&self.released_reserve);
        let hash = self.header().hash();
        BlockIndex {
            hash,
            prev: (!self.prev_hash.is_zero()).then_some(self.prev_hash),
            next: (!self.next_hash.is_zero()).then_some(self.next_hash),
            file: self.file,
            offset: self.offset,
            chain_trust: self.chain_trust,
            mint: self.mint,
            supply: self.supply,
            channel_height: self.channel_height,
            released_reserve,
            coinbase_rewards: self.coinbase_rewards,
            pending_checkpoint: (0, BlockHash::ZERO),
            flags: self.flags,
            stake_modifier: self.stake_modifier,
            version: self.version,
            merkle_root: self.merkle_root,
            channel: self.channel,
            height: self.height,
            bits: self.bits,
            nonce: self.nonce,
            time: self.time,
        }
    }

    /// The header this record carries a copy of.
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_hash: self.prev_hash,
            merkle_root: self.merkle_root,
            channel: self.channel,
            height: self.height,
            bits: self.bits,
            nonce: self.nonce,
            time: self.time,
        }
    }

    /// Encode the long form (what the index store persists).
    pub fn encode_long(&self) -> Vec<u8> {
        self.encode(true)
    }

    /// Encode the short form (linkage and header only).
    pub fn encode_short(&self) -> Vec<u8> {
        self.encode(false)
    }

    fn encode(&self, long: bool) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(512);
        out.extend_from_slice(&[if long { VARIANT_LONG } else { VARIANT_SHORT }]);

        codec::put_block_hash(&mut out, &self.next_hash);
        codec::put_u32(&mut out, self.file);
        codec::put_u64(&mut out, self.offset);
        codec::put_i64(&mut out, self.mint);
        codec::put_i64(&mut out, self.supply);
        codec::put_u32(&mut out, self.flags);
        codec::put_u64(&mut out, self.stake_modifier);

        if long {
            codec::put_u32(&mut out, self.channel_height);
            codec::put_u64(&mut out, self.chain_trust);
            for r in &self.coinbase_rewards {
                codec::put_i64(&mut out, *r);
            }
            for r in &self.released_reserve {
                codec::put_i64(&mut out, *r);
            }
        }

        codec::put_u32(&mut out, self.version);
        codec::put_block_hash(&mut out, &self.prev_hash);
        codec::put_merkle_hash(&mut out, &self.merkle_root);
        codec::put_u32(&mut out, self.channel);
        codec::put_u32(&mut out, self.height);
        codec::put_u32(&mut out, self.bits);
        codec::put_u64(&mut out, self.nonce);
        codec::put_u32(&mut out, self.time);
        out.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<DiskBlockIndex> {
        let mut buf = bytes;
        if buf.is_empty() {
            return Err(ChainError::Malformed("empty index record".into()));
        }
        let variant = buf[0];
        buf = &buf[1..];
        let long = match variant {
            VARIANT_SHORT => false,
            VARIANT_LONG => true,
            other => {
                return Err(ChainError::Malformed(format!(
                    "unknown index record variant {other}"
                )))
            }
        };

        let next_hash = codec::get_block_hash(&mut buf, "next hash")?;
        let file = codec::get_u32(&mut buf, "file")?;
        let offset = codec::get_u64(&mut buf, "offset")?;
        let mint = codec::get_i64(&mut buf, "mint")?;
        let supply = codec::get_i64(&mut buf, "supply")?;
        let flags = codec::get_u32(&mut buf, "flags")?;
        let stake_modifier = codec::get_u64(&mut buf, "stake modifier")?;

        let mut channel_height = 0;
        let mut chain_trust = 0;
        let mut coinbase_rewards = [0i64; CHANNEL_COUNT];
        let mut released_reserve = [0i64; RESERVE_WIRE_SLOTS];
        if long {
            channel_height = codec::get_u32(&mut buf, "channel height")?;
            chain_trust = codec::get_u64(&mut buf, "chain trust")?;
            for r in coinbase_rewards.iter_mut() {
                *r = codec::get_i64(&mut buf, "coinbase reward")?;
            }
            for r in released_reserve.iter_mut() {
                *r = codec::get_i64(&mut buf, "released reserve")?;
            }
        }

        let version = codec::get_u32(&mut buf, "index version")?;
        let prev_hash = codec::get_block_hash(&mut buf, "prev hash")?;
        let merkle_root = codec::get_merkle_hash(&mut buf, "merkle root")?;
        let channel = codec::get_u32(&mut buf, "channel")?;
        let height = codec::get_u32(&mut buf, "height")?;
        let bits = codec::get_u32(&mut buf, "bits")?;
        let nonce = codec::get_u64(&mut buf, "nonce")?;
        let time = codec::get_u32(&mut buf, "time")?;
        codec::expect_eof(buf, "index record")?;

        Ok(DiskBlockIndex {
            prev_hash,
            next_hash,
            file,
            offset,
            mint,
            supply,
            flags,
            stake_modifier,
            channel_height,
            chain_trust,
            coinbase_rewards,
            released_reserve,
            version,
            merkle_root,
            channel,
            height,
            bits,
            nonce,
            time,
        })
    }
}
