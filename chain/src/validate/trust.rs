//! # Chain trust
//!
//! Every block contributes a scalar trust amount; a node's cumulative
//! chain trust is the sum along its path from genesis, and the tip is the
//! node of maximum cumulative trust. The contribution is a pure function
//! of header fields, so every implementation computes the same value to
//! the last bit.
//!
//! - **Proof of work**: proportional to `1/target`, scaled by a per-channel
//!   weight.
//! - **Proof of stake**: the stake target's trust scaled by a coin-age
//!   weight. Stake blocks convey their coin-age (in seconds) in the header
//!   nonce; the kernel that proves the stake is outside this crate.

use crate::block::{BlockHeader, Channel};

/// Trust multiplier per channel. Index 0 (stake) uses the coin-age weight
/// path instead and keeps a unit entry here.
const CHANNEL_TRUST_WEIGHT: [u64; 3] = [1, 2, 2];

/// Coin-age cap and divisor for the stake weight: full weight at 90 days,
/// one step per week.
const STAKE_AGE_CAP_DAYS: u64 = 90;
const STAKE_AGE_STEP_DAYS: u64 = 7;

const SECS_PER_DAY: u64 = 86_400;

/// Work implied by a compact difficulty: an integer approximation of
/// `2^1024 / target`, saturating in u64.
///
/// Decomposes the compact form directly — `target = mantissa *
/// 256^(exponent-3)` — so the inverse is `(2^24 / mantissa) <<
/// 8*(128-exponent)`. Deterministic, monotonic in difficulty, and cheap
/// enough to run on every header.
pub fn compact_trust(bits: u32) -> u64 {
    let exp = ((bits >> 24) as u64).clamp(4, 128);
    let mantissa = (bits & 0x00ff_ffff).max(1) as u64;
    let zero_bits = 8 * (128 - exp);
    let inv = ((1u64 << 24) / mantissa).max(1);
    let wide = (inv as u128) << zero_bits.min(63);
    u64::try_from(wide).unwrap_or(u64::MAX)
}

/// Trust contributed by one block.
///
/// Callers have already validated the channel field; an out-of-range value
/// contributes nothing, which keeps this total function safe on raw
/// headers.
pub fn block_trust(header: &BlockHeader) -> u64 {
    let Some(channel) = header.channel() else {
        return 0;
    };
    let base = compact_trust(header.bits);
    match channel {
        Channel::Stake => {
            // Coin-age rides in the nonce for stake blocks.
            let age_days = header.nonce / SECS_PER_DAY;
            let weight = 1 + age_days.min(STAKE_AGE_CAP_DAYS) / STAKE_AGE_STEP_DAYS;
            base.saturating_mul(weight)
        }
        pow => base.saturating_mul(CHANNEL_TRUST_WEIGHT[pow.as_usize()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::{BlockHash, MerkleHash};

    fn header(channel: u32, bits: u32, nonce: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: BlockHash::ZERO,
            merkle_root: MerkleHash::ZERO,
            channel,
            height: 1,
            bits,
            nonce,
            time: 0,
        }
    }

    #[test]
    fn harder_target_earns_more_trust() {
        assert!(compact_trust(0x7c0f_ffff) > compact_trust(0x807f_ffff));
        assert!(compact_trust(0x2001_ffff) > compact_trust(0x7c0f_ffff));
    }

    #[test]
    fn compact_trust_saturates_at_extremes() {
        assert_eq!(compact_trust(0x0400_0001), u64::MAX);
        assert!(compact_trust(0x80ff_ffff) >= 1);
    }

    #[test]
    fn pow_channels_apply_weight() {
        let alpha = block_trust(&header(1, 0x807f_ffff, 0));
        let base = compact_trust(0x807f_ffff);
        assert_eq!(alpha, base * CHANNEL_TRUST_WEIGHT[1]);
    }

    #[test]
    fn stake_trust_grows_with_coin_age() {
        let young = block_trust(&header(0, 0x807f_ffff, SECS_PER_DAY));
        let old = block_trust(&header(0, 0x807f_ffff, 60 * SECS_PER_DAY));
        assert!(old > young);
    }

    #[test]
    fn stake_weight_caps_at_ninety_days() {
        let capped = block_trust(&header(0, 0x807f_ffff, 90 * SECS_PER_DAY));
        let beyond = block_trust(&header(0, 0x807f_ffff, 400 * SECS_PER_DAY));
        assert_eq!(capped, beyond);
    }

    #[test]
    fn unknown_channel_contributes_nothing() {
        assert_eq!(block_trust(&header(7, 0x807f_ffff, 0)), 0);
    }

    #[test]
    fn trust_is_deterministic() {
        let h = header(2, 0x7c0f_ffff, 5);
        assert_eq!(block_trust(&h), block_trust(&h));
    }
}
