//! # Block model
//!
//! A block is a signed, hashed header plus an ordered transaction list.
//! Nodes collect transactions, hash them into a Merkle tree, and seal the
//! result with whichever proof the block's channel demands: a nonce search
//! on the proof-of-work lanes, a staked coin-age plus signature on the
//! stake lane. Sealed blocks are appended to the `blk%04d.dat` files and
//! indexed in memory by [`BlockIndex`](crate::index::BlockIndex) nodes.
//!
//! ## Serialization modes
//!
//! One deterministic layout, three projections (the wire and the disk use
//! the same bytes):
//!
//! - [`Block::encode_full`] — header, transactions, block signature.
//! - [`Block::encode_header_only`] — header alone, for light relay.
//! - [`BlockHeader::encode_for_hash`] — the byte string the 1024-bit
//!   identity hash covers. The signature is *not* part of it: the
//!   signature signs the hash, never the other way around.

use std::fmt;

use bytes::BytesMut;

use crate::codec;
use crate::config::ChainParams;
use crate::crypto::hash::{block_hash, merkle_hash, BlockHash, MerkleHash};
use crate::error::{ChainError, Result};
use crate::merkle::MerkleTree;

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A disjoint stream of blocks with its own difficulty trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Proof of stake.
    Stake,
    /// First proof-of-work lane.
    Alpha,
    /// Second proof-of-work lane.
    Beta,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Stake, Channel::Alpha, Channel::Beta];

    /// Decode the raw header field. `None` for anything outside `0..=2`.
    pub fn from_u32(raw: u32) -> Option<Channel> {
        match raw {
            0 => Some(Channel::Stake),
            1 => Some(Channel::Alpha),
            2 => Some(Channel::Beta),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Channel::Stake => 0,
            Channel::Alpha => 1,
            Channel::Beta => 2,
        }
    }

    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    pub fn is_proof_of_stake(self) -> bool {
        self == Channel::Stake
    }

    pub fn is_proof_of_work(self) -> bool {
        !self.is_proof_of_stake()
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Stake => "stake",
            Channel::Alpha => "alpha",
            Channel::Beta => "beta",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Transactions (opaque records)
// ---------------------------------------------------------------------------

/// Reference to a previous transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub tx: MerkleHash,
    pub index: u32,
}

impl OutPoint {
    /// The coinbase marker: zero hash, max index.
    pub const NULL: OutPoint = OutPoint {
        tx: MerkleHash::ZERO,
        index: u32::MAX,
    };

    pub fn is_null(&self) -> bool {
        self.tx.is_zero() && self.index == u32::MAX
    }
}

/// A transaction input: the output it spends plus an opaque unlocking
/// script. Script semantics belong to the transaction engine; the chain
/// core only moves the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub script: Vec<u8>,
}

/// A transaction output: a value and an opaque locking script. By
/// convention the first coinbase output's script is the raw 32-byte payout
/// key the block signature verifies against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: i64,
    pub script: Vec<u8>,
}

/// An opaque serializable transaction record.
///
/// The chain core never evaluates scripts or balances; it knows a
/// transaction's hash, whether it is the coinbase, and which outpoints it
/// touches. Everything deeper goes through the
/// [`TxLedger`](crate::collab::TxLedger) seam.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub time: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build the coinbase for a block: one null-prevout input carrying
    /// `tag`, one output paying `value` to the raw `payout_key`.
    pub fn coinbase(time: u32, tag: &[u8], payout_key: &[u8], value: i64) -> Transaction {
        Transaction {
            version: 1,
            time,
            inputs: vec![TxInput {
                prevout: OutPoint::NULL,
                script: tag.to_vec(),
            }],
            outputs: vec![TxOutput {
                value,
                script: payout_key.to_vec(),
            }],
        }
    }

    /// A transaction is the coinbase iff its single input spends nothing.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// The payout key slot: first output script, which must be a raw
    /// 32-byte verifying key on the coinbase.
    pub fn payout_key(&self) -> Option<&[u8]> {
        self.outputs.first().map(|o| o.script.as_slice())
    }

    /// Sum of output values, saturating. Used for mint accounting.
    pub fn total_out(&self) -> i64 {
        self.outputs
            .iter()
            .fold(0i64, |acc, o| acc.saturating_add(o.value))
    }

    /// 512-bit transaction id over the canonical encoding.
    pub fn hash(&self) -> MerkleHash {
        merkle_hash(&self.encode())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        self.encode_into(&mut out);
        out.to_vec()
    }

    pub(crate) fn encode_into(&self, out: &mut BytesMut) {
        codec::put_u32(out, self.version);
        codec::put_u32(out, self.time);
        codec::put_u32(out, self.inputs.len() as u32);
        for input in &self.inputs {
            codec::put_merkle_hash(out, &input.prevout.tx);
            codec::put_u32(out, input.prevout.index);
            codec::put_var_bytes(out, &input.script);
        }
        codec::put_u32(out, self.outputs.len() as u32);
        for output in &self.outputs {
            codec::put_i64(out, output.value);
            codec::put_var_bytes(out, &output.script);
        }
    }

    pub(crate) fn decode_from(buf: &mut &[u8]) -> Result<Transaction> {
        let version = codec::get_u32(buf, "tx version")?;
        let time = codec::get_u32(buf, "tx time")?;

        let n_in = codec::get_count(buf, 68, "tx inputs")?;
        let mut inputs = Vec::with_capacity(n_in);
        for _ in 0..n_in {
            let tx = codec::get_merkle_hash(buf, "prevout hash")?;
            let index = codec::get_u32(buf, "prevout index")?;
            let script = codec::get_var_bytes(buf, "input script")?;
            inputs.push(TxInput {
                prevout: OutPoint { tx, index },
                script,
            });
        }

        let n_out = codec::get_count(buf, 12, "tx outputs")?;
        let mut outputs = Vec::with_capacity(n_out);
        for _ in 0..n_out {
            let value = codec::get_i64(buf, "output value")?;
            let script = codec::get_var_bytes(buf, "output script")?;
            outputs.push(TxOutput { value, script });
        }

        Ok(Transaction {
            version,
            time,
            inputs,
            outputs,
        })
    }
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// The hashed core of a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: BlockHash,
    pub merkle_root: MerkleHash,
    /// Raw channel field as carried on the wire; see [`BlockHeader::channel`].
    pub channel: u32,
    pub height: u32,
    pub bits: u32,
    pub nonce: u64,
    /// Block time, set when the proof is sealed.
    pub time: u32,
}

impl BlockHeader {
    /// Decode the channel field. `None` means the header is invalid.
    pub fn channel(&self) -> Option<Channel> {
        Channel::from_u32(self.channel)
    }

    /// The exact byte string the 1024-bit identity hash covers.
    pub fn encode_for_hash(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(220);
        self.encode_into(&mut out);
        out.to_vec()
    }

    pub(crate) fn encode_into(&self, out: &mut BytesMut) {
        codec::put_u32(out, self.version);
        codec::put_block_hash(out, &self.prev_hash);
        codec::put_merkle_hash(out, &self.merkle_root);
        codec::put_u32(out, self.channel);
        codec::put_u32(out, self.height);
        codec::put_u32(out, self.bits);
        codec::put_u64(out, self.nonce);
        codec::put_u32(out, self.time);
    }

    pub(crate) fn decode_from(buf: &mut &[u8]) -> Result<BlockHeader> {
        Ok(BlockHeader {
            version: codec::get_u32(buf, "header version")?,
            prev_hash: codec::get_block_hash(buf, "prev hash")?,
            merkle_root: codec::get_merkle_hash(buf, "merkle root")?,
            channel: codec::get_u32(buf, "channel")?,
            height: codec::get_u32(buf, "height")?,
            bits: codec::get_u32(buf, "bits")?,
            nonce: codec::get_u64(buf, "nonce")?,
            time: codec::get_u32(buf, "time")?,
        })
    }

    /// The block identity hash.
    pub fn hash(&self) -> BlockHash {
        block_hash(&self.encode_for_hash())
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header, transactions, and the block signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub vtx: Vec<Transaction>,
    pub signature: Vec<u8>,
}

impl Block {
    /// Construct the genesis block for the given network parameters.
    ///
    /// Height 0, zero parent, an unspendable coinbase carrying the network
    /// tag, no signature. Deterministic: every node derives the same
    /// genesis hash from the same parameters.
    pub fn genesis(params: &ChainParams) -> Block {
        let coinbase =
            Transaction::coinbase(params.genesis_time, params.genesis_tag, &[0u8; 32], 0);
        let merkle_root = MerkleTree::build(&[coinbase.hash()]).root();
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: BlockHash::ZERO,
                merkle_root,
                channel: Channel::Alpha.as_u32(),
                height: 0,
                bits: params.floor_bits[Channel::Alpha.as_usize()],
                nonce: 0,
                time: params.genesis_time,
            },
            vtx: vec![coinbase],
            signature: Vec::new(),
        }
    }

    /// The block identity hash (header projection only).
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// The message the block signature covers: the identity hash bytes.
    pub fn signature_hash(&self) -> [u8; crate::crypto::hash::BLOCK_HASH_LEN] {
        self.hash().0
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash.is_zero()
    }

    /// Recompute the Merkle root over the block's transaction hashes.
    pub fn build_merkle_root(&self) -> MerkleHash {
        let leaves: Vec<MerkleHash> = self.vtx.iter().map(Transaction::hash).collect();
        MerkleTree::build(&leaves).root()
    }

    /// Build the full Merkle tree, level cache included, for branch
    /// extraction.
    pub fn merkle_tree(&self) -> MerkleTree {
        let leaves: Vec<MerkleHash> = self.vtx.iter().map(Transaction::hash).collect();
        MerkleTree::build(&leaves)
    }

    /// Builder clock rule: a candidate's time is the later of local wall
    /// clock and one past the parent's median-time-past.
    pub fn update_time(&mut self, now: u32, median_time_past: u32) {
        self.header.time = now.max(median_time_past.saturating_add(1));
    }

    // -- Serialization ------------------------------------------------------

    /// Full serialization: header, transactions, block signature.
    pub fn encode_full(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(512);
        self.header.encode_into(&mut out);
        codec::put_u32(&mut out, self.vtx.len() as u32);
        for tx in &self.vtx {
            tx.encode_into(&mut out);
        }
        codec::put_var_bytes(&mut out, &self.signature);
        out.to_vec()
    }

    /// Header-only serialization: transactions and signature omitted.
    pub fn encode_header_only(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(220);
        self.header.encode_into(&mut out);
        out.to_vec()
    }

    pub fn decode_full(bytes: &[u8]) -> Result<Block> {
        let mut buf = bytes;
        let header = BlockHeader::decode_from(&mut buf)?;
        let n_tx = codec::get_count(&mut buf, 8, "block txs")?;
        let mut vtx = Vec::with_capacity(n_tx);
        for _ in 0..n_tx {
            vtx.push(Transaction::decode_from(&mut buf)?);
        }
        let signature = codec::get_var_bytes(&mut buf, "block signature")?;
        codec::expect_eof(buf, "block")?;
        Ok(Block {
            header,
            vtx,
            signature,
        })
    }

    /// Decode a header-only serialization into a bodyless block.
    pub fn decode_header_only(bytes: &[u8]) -> Result<Block> {
        let mut buf = bytes;
        let header = BlockHeader::decode_from(&mut buf)?;
        codec::expect_eof(buf, "block header")?;
        Ok(Block {
            header,
            vtx: Vec::new(),
            signature: Vec::new(),
        })
    }

    /// Channel accessor that treats an out-of-range field as malformed.
    pub fn channel(&self) -> Result<Channel> {
        self.header
            .channel()
            .ok_or_else(|| ChainError::Malformed(format!("unknown channel {}", self.header.channel)))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} height={} channel={} txs={} time={}",
            self.hash().short(),
            self.header.height,
            self.header.channel,
            self.vtx.len(),
            self.header.time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(seed: u8) -> Transaction {
        Transaction {
            version: 1,
            time: 1_767_225_700,
            inputs: vec![TxInput {
                prevout: OutPoint {
                    tx: merkle_hash(&[seed]),
                    index: seed as u32,
                },
                script: vec![seed; 4],
            }],
            outputs: vec![TxOutput {
                value: 1_000 * (seed as i64 + 1),
                script: vec![seed; 32],
            }],
        }
    }

    fn sample_block() -> Block {
        let coinbase = Transaction::coinbase(1_767_225_700, b"tag", &[9u8; 32], 5_000);
        let vtx = vec![coinbase, sample_tx(1), sample_tx(2)];
        let mut block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: block_hash(b"parent"),
                merkle_root: MerkleHash::ZERO,
                channel: 1,
                height: 42,
                bits: 0x8070_ffff,
                nonce: 7,
                time: 1_767_225_800,
            },
            vtx,
            signature: vec![0xAB; 64],
        };
        block.header.merkle_root = block.build_merkle_root();
        block
    }

    #[test]
    fn channel_round_trip() {
        for ch in Channel::ALL {
            assert_eq!(Channel::from_u32(ch.as_u32()), Some(ch));
        }
        assert_eq!(Channel::from_u32(3), None);
        assert!(Channel::Stake.is_proof_of_stake());
        assert!(Channel::Alpha.is_proof_of_work());
        assert!(Channel::Beta.is_proof_of_work());
    }

    #[test]
    fn coinbase_detection() {
        let cb = Transaction::coinbase(0, b"tag", &[1u8; 32], 50);
        assert!(cb.is_coinbase());
        assert!(!sample_tx(1).is_coinbase());
    }

    #[test]
    fn transaction_round_trip() {
        let tx = sample_tx(3);
        let bytes = tx.encode();
        let mut buf = &bytes[..];
        let back = Transaction::decode_from(&mut buf).unwrap();
        assert_eq!(back, tx);
        assert!(buf.is_empty());
    }

    #[test]
    fn block_full_round_trip() {
        let block = sample_block();
        let bytes = block.encode_full();
        let back = Block::decode_full(&bytes).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.hash(), block.hash());
    }

    #[test]
    fn header_only_round_trip_drops_body() {
        let block = sample_block();
        let bytes = block.encode_header_only();
        let back = Block::decode_header_only(&bytes).unwrap();
        assert_eq!(back.header, block.header);
        assert!(back.vtx.is_empty());
        assert!(back.signature.is_empty());
        // Same identity either way.
        assert_eq!(back.hash(), block.hash());
    }

    #[test]
    fn hash_ignores_body_and_signature() {
        let mut block = sample_block();
        let h = block.hash();
        block.signature = vec![0xCD; 64];
        block.vtx.pop();
        assert_eq!(block.hash(), h);
    }

    #[test]
    fn hash_covers_every_header_field() {
        let base = sample_block();
        let mut variants = Vec::new();

        let mut b = base.clone();
        b.header.version ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.prev_hash.0[0] ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.merkle_root.0[0] ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.channel ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.height ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.bits ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.nonce ^= 1;
        variants.push(b);
        let mut b = base.clone();
        b.header.time ^= 1;
        variants.push(b);

        for v in variants {
            assert_ne!(v.hash(), base.hash());
        }
    }

    #[test]
    fn truncated_block_is_malformed() {
        let bytes = sample_block().encode_full();
        for cut in [0, 4, 100, bytes.len() - 1] {
            assert!(Block::decode_full(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut bytes = sample_block().encode_full();
        bytes.push(0);
        assert!(Block::decode_full(&bytes).is_err());
    }

    #[test]
    fn genesis_is_deterministic() {
        let params = ChainParams::mainnet();
        let a = Block::genesis(&params);
        let b = Block::genesis(&params);
        assert_eq!(a.hash(), b.hash());
        assert!(a.is_genesis());
        assert_eq!(a.header.height, 0);
        assert!(a.header.prev_hash.is_zero());
        assert!(a.vtx[0].is_coinbase());
        assert!(a.signature.is_empty());
        // Different tag, different chain.
        let reg = Block::genesis(&ChainParams::regtest());
        assert_ne!(a.hash(), reg.hash());
    }

    #[test]
    fn merkle_root_matches_tree() {
        let block = sample_block();
        assert_eq!(block.header.merkle_root, block.build_merkle_root());
        assert_eq!(block.merkle_tree().root(), block.build_merkle_root());
    }

    #[test]
    fn update_time_respects_median() {
        let mut block = sample_block();
        block.update_time(100, 500);
        assert_eq!(block.header.time, 501);
        block.update_time(1_000, 500);
        assert_eq!(block.header.time, 1_000);
    }
}
