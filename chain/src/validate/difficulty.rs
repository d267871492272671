//! # Difficulty: targets, compact bits, and per-channel retargeting
//!
//! A proof-of-work target is a 1024-bit threshold the block identity hash
//! must not exceed. Headers carry targets in compact form: one exponent
//! byte (the count of significant bytes) and a 3-byte mantissa, so
//! `target = mantissa * 256^(exponent - 3)`.
//!
//! Each channel retargets independently, every block: the time between the
//! last two same-channel blocks is compared to the channel's target
//! spacing, the ratio is clipped to [1/2, 2] per block to keep any single
//! block from swinging the trajectory, and the result is clamped to the
//! network's floor (the easiest allowed target).

use crate::crypto::hash::{BlockHash, BLOCK_HASH_LEN};

/// Number of bytes in a full-width target.
const TARGET_BYTES: usize = BLOCK_HASH_LEN;

/// Per-block clip on the retarget ratio.
const RETARGET_CLIP: u64 = 2;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// A 1024-bit target, little-endian bytes. Compared against block hashes
/// interpreted the same way.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Target([u8; TARGET_BYTES]);

impl Target {
    pub const ZERO: Target = Target([0u8; TARGET_BYTES]);

    /// Expand compact bits. An exponent above 128 saturates to 128; a zero
    /// mantissa yields the zero target (which nothing satisfies).
    pub fn from_compact(bits: u32) -> Target {
        let exp = ((bits >> 24) as usize).min(TARGET_BYTES);
        let mantissa = bits & 0x00ff_ffff;
        let mut out = [0u8; TARGET_BYTES];

        if exp <= 3 {
            let shifted = mantissa >> (8 * (3 - exp));
            out[..4].copy_from_slice(&shifted.to_le_bytes());
        } else {
            let lo = exp - 3; // byte offset of the mantissa's low byte
            let m = mantissa.to_le_bytes();
            for (i, b) in m[..3].iter().enumerate() {
                if lo + i < TARGET_BYTES {
                    out[lo + i] = *b;
                }
            }
        }
        Target(out)
    }

    /// Compress to compact bits, truncating below the top three bytes.
    pub fn to_compact(&self) -> u32 {
        let Some(top) = self.0.iter().rposition(|b| *b != 0) else {
            return 0;
        };
        let exp = top + 1;
        let byte = |i: isize| -> u32 {
            if i < 0 {
                0
            } else {
                self.0[i as usize] as u32
            }
        };
        let mantissa =
            (byte(top as isize) << 16) | (byte(top as isize - 1) << 8) | byte(top as isize - 2);
        ((exp as u32) << 24) | mantissa
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// True when the hash, read as a little-endian 1024-bit integer, does
    /// not exceed this target.
    pub fn is_met_by(&self, hash: &BlockHash) -> bool {
        // Compare from the most significant byte down.
        for i in (0..TARGET_BYTES).rev() {
            let h = hash.as_bytes()[i];
            let t = self.0[i];
            if h != t {
                return h < t;
            }
        }
        true
    }

    /// Multiply by a small factor, saturating at the all-ones target.
    pub fn mul_u64(&self, factor: u64) -> Target {
        let mut out = [0u8; TARGET_BYTES];
        let mut carry: u128 = 0;
        for i in 0..TARGET_BYTES {
            let prod = self.0[i] as u128 * factor as u128 + carry;
            out[i] = (prod & 0xff) as u8;
            carry = prod >> 8;
        }
        if carry != 0 {
            return Target([0xff; TARGET_BYTES]);
        }
        Target(out)
    }

    /// Divide by a small factor, flooring. Division by zero is a caller
    /// bug; it returns the zero target rather than panicking.
    pub fn div_u64(&self, divisor: u64) -> Target {
        if divisor == 0 {
            debug_assert!(false, "target division by zero");
            return Target::ZERO;
        }
        let mut out = [0u8; TARGET_BYTES];
        let mut rem: u128 = 0;
        for i in (0..TARGET_BYTES).rev() {
            let acc = (rem << 8) | self.0[i] as u128;
            out[i] = (acc / divisor as u128) as u8;
            rem = acc % divisor as u128;
        }
        Target(out)
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Target) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Target) -> std::cmp::Ordering {
        for i in (0..TARGET_BYTES).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Target(0x{:08x})", self.to_compact())
    }
}

// ---------------------------------------------------------------------------
// Retargeting
// ---------------------------------------------------------------------------

/// Compute the next compact difficulty from the spacing actually observed
/// between the last two same-channel blocks.
///
/// Pure: callers (the contextual validator and the builder) are
/// responsible for walking the index tree to find `last_bits` and
/// `actual_spacing`; see [`crate::index::BlockIndexTree::last_of_channel`].
pub fn retarget_compact(
    last_bits: u32,
    actual_spacing: u32,
    target_spacing: u32,
    floor_bits: u32,
) -> u32 {
    let spacing = target_spacing.max(1) as u64;
    let actual = (actual_spacing.max(1) as u64).clamp(spacing / RETARGET_CLIP, spacing * RETARGET_CLIP);

    let scaled = Target::from_compact(last_bits)
        .mul_u64(actual)
        .div_u64(spacing);

    let floor = Target::from_compact(floor_bits);
    if scaled.is_zero() || scaled > floor {
        floor_bits
    } else {
        scaled.to_compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::block_hash;

    #[test]
    fn compact_round_trip_canonical() {
        // Canonical compacts carry a nonzero top mantissa byte.
        for bits in [0x807f_ffffu32, 0x7dff_ffff, 0x7c0f_ffff, 0x2001_ffff, 0x0401_0000] {
            let t = Target::from_compact(bits);
            assert_eq!(t.to_compact(), bits, "bits 0x{bits:08x}");
        }
    }

    #[test]
    fn non_canonical_compact_normalizes() {
        // A zero top mantissa byte re-encodes with a smaller exponent.
        let t = Target::from_compact(0x2000_ffff);
        assert_eq!(t.to_compact(), 0x1fff_ff00);
    }

    #[test]
    fn zero_round_trip() {
        assert!(Target::from_compact(0).is_zero());
        assert_eq!(Target::ZERO.to_compact(), 0);
    }

    #[test]
    fn larger_exponent_is_larger_target() {
        let small = Target::from_compact(0x1000_ffff);
        let large = Target::from_compact(0x2000_ffff);
        assert!(large > small);
    }

    #[test]
    fn mul_div_round_trip() {
        let t = Target::from_compact(0x7dff_ffff);
        assert_eq!(t.mul_u64(6).div_u64(6), t);
        assert!(t.mul_u64(2) > t);
        assert!(t.div_u64(2) < t);
    }

    #[test]
    fn mul_saturates() {
        let t = Target([0xff; 128]);
        assert_eq!(t.mul_u64(2), Target([0xff; 128]));
    }

    #[test]
    fn zero_target_is_met_by_nothing() {
        let h = block_hash(b"anything");
        assert!(!Target::ZERO.is_met_by(&h));
        // Except the literal zero hash, which no real header produces.
        assert!(Target::ZERO.is_met_by(&BlockHash::ZERO));
    }

    #[test]
    fn max_target_is_met_by_everything() {
        let t = Target([0xff; 128]);
        assert!(t.is_met_by(&block_hash(b"a")));
        assert!(t.is_met_by(&block_hash(b"b")));
    }

    #[test]
    fn is_met_by_matches_ordering() {
        // A hash equal to the target satisfies it; one past it does not.
        let t = Target::from_compact(0x807f_ffff);
        let mut equal = [0u8; 128];
        equal[125] = 0xff;
        equal[126] = 0xff;
        equal[127] = 0x7f;
        assert!(t.is_met_by(&BlockHash(equal)));

        let mut above = equal;
        above[0] = 1;
        assert!(!t.is_met_by(&BlockHash(above)));
    }

    #[test]
    fn retarget_slower_blocks_ease_target() {
        // Blocks arriving slower than spacing raise (ease) the target.
        let next = retarget_compact(0x7dff_ffff, 100, 50, 0x807f_ffff);
        assert!(Target::from_compact(next) > Target::from_compact(0x7dff_ffff));
    }

    #[test]
    fn retarget_faster_blocks_tighten_target() {
        let next = retarget_compact(0x7dff_ffff, 25, 50, 0x807f_ffff);
        assert!(Target::from_compact(next) < Target::from_compact(0x7dff_ffff));
    }

    #[test]
    fn retarget_on_pace_holds() {
        assert_eq!(retarget_compact(0x7dff_ffff, 50, 50, 0x807f_ffff), 0x7dff_ffff);
    }

    #[test]
    fn retarget_clips_swings() {
        // A ten-minute gap on a 50-second channel only doubles the target.
        let clipped = retarget_compact(0x7dff_ffff, 600, 50, 0x807f_ffff);
        let doubled = Target::from_compact(0x7dff_ffff).mul_u64(2);
        assert_eq!(Target::from_compact(clipped), Target::from_compact(doubled.to_compact()));
    }

    #[test]
    fn retarget_never_exceeds_floor() {
        // Already at the floor and slowing down: stay at the floor.
        assert_eq!(retarget_compact(0x807f_ffff, 500, 50, 0x807f_ffff), 0x807f_ffff);
    }
}
