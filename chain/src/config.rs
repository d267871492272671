//! # Protocol constants & network parameters
//!
//! Every consensus-critical magic number lives here. The split is:
//! compile-time constants for values no deployment may vary (hash widths,
//! channel count, framing magic), and [`ChainParams`] for the knobs that
//! differ between the production network and an isolated test network
//! (genesis fields, difficulty floors, checkpoints).
//!
//! Changing any constant in this file after launch is a hard fork. Choose
//! once.

use crate::crypto::hash::BlockHash;

// ---------------------------------------------------------------------------
// Network framing
// ---------------------------------------------------------------------------

/// Magic bytes preceding every record in the block files and every block on
/// the wire: "TRID" little-endian.
pub const NETWORK_MAGIC: u32 = 0x4449_5254;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Number of mining channels: stake (0) plus two proof-of-work lanes.
pub const CHANNEL_COUNT: usize = 3;

/// Reserve rollup slots carried on every index entry. One per channel plus
/// a fourth slot held for a future channel; connect/disconnect never touch
/// index 3.
pub const RESERVE_SLOTS: usize = 4;

// ---------------------------------------------------------------------------
// Monetary units
// ---------------------------------------------------------------------------

/// Smallest unit: 10^8 per whole coin, eight decimals.
pub const COIN: i64 = 100_000_000;

/// Blocks a coinbase output must age before its value is spendable.
pub const COINBASE_MATURITY: u32 = 100;

/// Per-block reserve release credited to each channel's rollup slot.
pub const RESERVE_PER_BLOCK: [i64; CHANNEL_COUNT] = [COIN, 2 * COIN, 2 * COIN];

// ---------------------------------------------------------------------------
// Validation bounds
// ---------------------------------------------------------------------------

/// Hard cap on a block's full serialization.
pub const MAX_BLOCK_BYTES: usize = 2 * 1024 * 1024;

/// Budget the builder fills from the mempool; leaves headroom under the
/// hard cap for the coinbase and the block signature.
pub const BUILDER_BLOCK_BUDGET: usize = MAX_BLOCK_BYTES / 2;

/// A block's time may run at most this far ahead of local wall clock.
pub const MAX_CLOCK_DRIFT_SECS: u32 = 7_200;

/// Window for the median-time-past rule: a block's time must exceed the
/// median of this many ancestor timestamps.
pub const MEDIAN_TIME_SPAN: usize = 11;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Soft cap on a single `blk%04d.dat` file; appends roll to the next file
/// past this.
pub const BLOCK_FILE_SOFT_CAP: u64 = 128 * 1024 * 1024;

/// Orphan pool bounds: entry count and total serialized bytes.
pub const ORPHAN_POOL_MAX_BLOCKS: usize = 768;
pub const ORPHAN_POOL_MAX_BYTES: usize = 32 * 1024 * 1024;

// ---------------------------------------------------------------------------
// ChainParams
// ---------------------------------------------------------------------------

/// Per-network consensus parameters.
///
/// `mainnet()` is the production profile. `regtest()` drops every
/// difficulty floor to near-trivial so tests and the dev miner can seal
/// blocks in microseconds; nothing else differs.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Framing magic for block files and wire payloads.
    pub magic: u32,
    /// Timestamp baked into the genesis header.
    pub genesis_time: u32,
    /// Message hashed into the genesis coinbase — the chain's birth
    /// certificate.
    pub genesis_tag: &'static [u8],
    /// Compact difficulty of the genesis block and floor (easiest allowed
    /// target) per channel.
    pub floor_bits: [u32; CHANNEL_COUNT],
    /// Target seconds between blocks, per channel.
    pub spacing: [u32; CHANNEL_COUNT],
    /// Hardened checkpoints: `(height, hash)` pairs the chain must agree
    /// with, ascending by height.
    pub checkpoints: Vec<(u32, BlockHash)>,
    /// A tip older than this many seconds means the node is still in
    /// initial block download.
    pub initial_download_lag: u32,
}

impl ChainParams {
    /// Production network parameters.
    pub fn mainnet() -> ChainParams {
        ChainParams {
            magic: NETWORK_MAGIC,
            genesis_time: 1_767_225_600, // 2026-01-01 00:00:00 UTC
            genesis_tag: b"TRIDENT/2026: three prongs, one ledger",
            // Roughly 36 bits of work per block at launch.
            floor_bits: [0x7c0f_ffff, 0x7c0f_ffff, 0x7c0f_ffff],
            spacing: [150, 50, 50],
            checkpoints: Vec::new(),
            initial_download_lag: 24 * 60 * 60,
        }
    }

    /// Isolated-network parameters for tests and `--dev` mode: every
    /// channel's floor is one bit of work.
    pub fn regtest() -> ChainParams {
        ChainParams {
            magic: NETWORK_MAGIC,
            genesis_time: 1_767_225_600,
            genesis_tag: b"TRIDENT/regtest",
            floor_bits: [0x807f_ffff, 0x807f_ffff, 0x807f_ffff],
            spacing: [150, 50, 50],
            checkpoints: Vec::new(),
            initial_download_lag: u32::MAX, // regtest is never "behind"
        }
    }
}

// ---------------------------------------------------------------------------
// Reward schedule
// ---------------------------------------------------------------------------

/// Coinbase subsidy for a proof-of-work block at the given compact
/// difficulty: a flat base plus a difficulty-weighted bonus, so the harder
/// lane earns more per block.
pub fn proof_of_work_reward(bits: u32) -> i64 {
    let base = 50 * COIN;
    let trust = crate::validate::trust::compact_trust(bits);
    // ilog2 of trust spans 0..=63; a tenth of a coin per doubling.
    let bonus = (trust.max(1).ilog2() as i64) * (COIN / 10);
    base + bonus
}

/// Stake reward for the given coin-age, measured in coin-days: two percent
/// annualized, floor division.
pub fn proof_of_stake_reward(coin_age: i64) -> i64 {
    if coin_age <= 0 {
        return 0;
    }
    coin_age.saturating_mul(COIN) / 365 * 2 / 100
}
