//! # Block validation
//!
//! Two layers, run in order:
//!
//! 1. **Stateless** ([`check_block`]) — everything decidable from the
//!    block bytes and the wall clock alone: structure, size, Merkle root,
//!    proof of work, block signature, and per-transaction checks delegated
//!    to the transaction engine. Failures are [`ChainError::InvalidHeader`]
//!    (or `Malformed` for undecodable channels) and the block is dropped
//!    without touching state.
//!
//! 2. **Contextual** ([`check_context`]) — everything requiring the index
//!    tree: height continuity, median-time-past, the expected per-channel
//!    difficulty, and checkpoint compliance. Failures are
//!    [`ChainError::InvalidContext`].
//!
//! The chain manager runs layer 1 on every arrival and layer 2 once the
//! parent is known.

pub mod checkpoint;
pub mod difficulty;
pub mod trust;

use tracing::debug;

use crate::block::{Block, Channel};
use crate::collab::TxLedger;
use crate::config::{ChainParams, MAX_BLOCK_BYTES, MAX_CLOCK_DRIFT_SECS};
use crate::crypto::hash::BlockHash;
use crate::crypto::sig::verify_block_signature;
use crate::error::{ChainError, Result};
use crate::index::{BlockIndex, BlockIndexTree};
use difficulty::{retarget_compact, Target};

fn invalid(reason: impl Into<String>) -> ChainError {
    ChainError::InvalidHeader(reason.into())
}

// ---------------------------------------------------------------------------
// Stateless checks
// ---------------------------------------------------------------------------

/// Context-free block validity. `now` is the local wall clock in unix
/// seconds; the caller injects it so tests can pin time.
pub fn check_block(block: &Block, ledger: &dyn TxLedger, now: u32) -> Result<()> {
    let channel = block.channel()?;

    // Structure: the coinbase leads, alone.
    if block.vtx.is_empty() {
        return Err(invalid("block has no transactions"));
    }
    if !block.vtx[0].is_coinbase() {
        return Err(invalid("first transaction is not the coinbase"));
    }
    if block.vtx[1..].iter().any(|tx| tx.is_coinbase()) {
        return Err(invalid("more than one coinbase"));
    }

    // Size bound on the full serialization.
    let encoded = block.encode_full();
    if encoded.len() > MAX_BLOCK_BYTES {
        return Err(invalid(format!(
            "block is {} bytes, cap is {MAX_BLOCK_BYTES}",
            encoded.len()
        )));
    }

    // Clock drift.
    if block.header.time > now.saturating_add(MAX_CLOCK_DRIFT_SECS) {
        return Err(invalid(format!(
            "block time {} too far in the future (now {now})",
            block.header.time
        )));
    }

    // Merkle root must reproduce from the body.
    let rebuilt = block.build_merkle_root();
    if rebuilt != block.header.merkle_root {
        return Err(invalid("merkle root mismatch"));
    }

    // Genesis is self-certifying: its hash is pinned by the network
    // parameters, so proof and signature checks do not apply.
    if block.is_genesis() {
        return Ok(());
    }

    // Proof of work on the PoW lanes.
    if channel.is_proof_of_work() {
        let target = Target::from_compact(block.header.bits);
        if !target.is_met_by(&block.hash()) {
            return Err(invalid("hash does not satisfy the claimed target"));
        }
    }

    // Block signature against the coinbase payout key (the stake key for
    // stake blocks — same slot).
    let key = block.vtx[0]
        .payout_key()
        .ok_or_else(|| invalid("coinbase has no payout key"))?;
    if !verify_block_signature(key, &block.signature_hash(), &block.signature) {
        return Err(invalid("bad block signature"));
    }

    // Per-transaction checks belong to the transaction engine.
    for tx in &block.vtx {
        ledger.check_transaction(tx)?;
    }

    debug!(block = %block.hash().short(), channel = %channel, "stateless checks passed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Contextual checks
// ---------------------------------------------------------------------------

/// Everything [`check_block`] could not see. On success returns the
/// pending checkpoint pair the new index node will carry.
pub fn check_context(
    block: &Block,
    parent: &BlockIndex,
    tree: &BlockIndexTree,
    params: &ChainParams,
    hardened: &[(u32, BlockHash)],
) -> Result<(u32, BlockHash)> {
    let channel = block.channel()?;

    if parent.is_failed() {
        return Err(ChainError::InvalidContext(
            "parent is on an invalid fork".into(),
        ));
    }

    if block.header.height != parent.height + 1 {
        return Err(ChainError::InvalidContext(format!(
            "height {} does not follow parent height {}",
            block.header.height, parent.height
        )));
    }

    let mtp = tree.median_time_past(parent);
    if block.header.time <= mtp {
        return Err(ChainError::InvalidContext(format!(
            "block time {} not past median time {mtp}",
            block.header.time
        )));
    }

    let expected = expected_bits(tree, parent, channel, params);
    if block.header.bits != expected {
        return Err(ChainError::InvalidContext(format!(
            "bits 0x{:08x} but channel {channel} expects 0x{expected:08x}",
            block.header.bits
        )));
    }

    checkpoint::check_hardened(&block.hash(), block.header.height, parent, tree, hardened)?;
    checkpoint::advance_pending(tree, parent, block.header.height)
}

/// The compact difficulty a block extending `parent` on `channel` must
/// claim: each channel retargets from the spacing between its own last two
/// blocks, independent of the other channels.
pub fn expected_bits(
    tree: &BlockIndexTree,
    parent: &BlockIndex,
    channel: Channel,
    params: &ChainParams,
) -> u32 {
    let floor = params.floor_bits[channel.as_usize()];
    let Some(last) = tree.last_of_channel(parent, channel) else {
        // The channel has never produced a block: start at the floor.
        return floor;
    };
    let prev = last
        .prev
        .and_then(|h| tree.get(&h))
        .and_then(|p| tree.last_of_channel(p, channel));
    let Some(prev) = prev else {
        // One block so far: hold its difficulty.
        return last.bits;
    };

    let actual = last.time.saturating_sub(prev.time).max(1);
    retarget_compact(last.bits, actual, params.spacing[channel.as_usize()], floor)
}
