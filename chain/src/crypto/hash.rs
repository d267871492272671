//! # Hashing
//!
//! Trident uses two hash widths and refuses to grow more:
//!
//! - **1024-bit block identity hash** — BLAKE3 in extended-output mode over
//!   the header's hashing serialization. The wide digest is what the
//!   proof-of-work targets compare against, so the extra bytes are not
//!   decoration: they are the work space.
//!
//! - **512-bit transaction / Merkle hash** — SHA-512 over the canonical
//!   encoding. Transaction ids and every interior Merkle node use this.
//!
//! Both digests are wrapped in newtypes so a transaction hash can never be
//! passed where a block hash is expected. The newtypes order and hash as
//! plain byte arrays, which is exactly what the index map and sled keys need.

use std::fmt;

use sha2::{Digest, Sha512};

/// Byte width of the 1024-bit block identity hash.
pub const BLOCK_HASH_LEN: usize = 128;

/// Byte width of the 512-bit transaction / Merkle hash.
pub const MERKLE_HASH_LEN: usize = 64;

// ---------------------------------------------------------------------------
// BlockHash
// ---------------------------------------------------------------------------

/// 1024-bit block identity hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub [u8; BLOCK_HASH_LEN]);

impl BlockHash {
    /// The all-zero hash. Used as the genesis block's `prev_hash` and as
    /// the "no hash" sentinel in disk index records.
    pub const ZERO: BlockHash = BlockHash([0u8; BLOCK_HASH_LEN]);

    /// True if this is the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 256-character hex string.
    pub fn from_hex(s: &str) -> Option<BlockHash> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; BLOCK_HASH_LEN] = bytes.try_into().ok()?;
        Some(BlockHash(arr))
    }

    /// Abbreviated form for log lines. The full 256-hex-char rendering
    /// drowns everything around it.
    pub fn short(&self) -> String {
        format!("{}..{}", hex::encode(&self.0[..4]), hex::encode(&self.0[124..]))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.short())
    }
}

// ---------------------------------------------------------------------------
// MerkleHash
// ---------------------------------------------------------------------------

/// 512-bit transaction id / Merkle node hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MerkleHash(pub [u8; MERKLE_HASH_LEN]);

impl MerkleHash {
    /// The all-zero hash: the Merkle root of an empty transaction list and
    /// the null prevout of a coinbase input.
    pub const ZERO: MerkleHash = MerkleHash([0u8; MERKLE_HASH_LEN]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; MERKLE_HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<MerkleHash> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; MERKLE_HASH_LEN] = bytes.try_into().ok()?;
        Some(MerkleHash(arr))
    }

    pub fn short(&self) -> String {
        format!("{}..{}", hex::encode(&self.0[..4]), hex::encode(&self.0[60..]))
    }
}

impl fmt::Display for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MerkleHash({})", self.short())
    }
}

// ---------------------------------------------------------------------------
// Hash functions
// ---------------------------------------------------------------------------

/// Compute the 1024-bit block identity hash of the given bytes.
///
/// BLAKE3's extended output reads the first 128 bytes of the XOF stream.
/// The digest is interpreted little-endian when compared against a
/// proof-of-work target.
pub fn block_hash(data: &[u8]) -> BlockHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    let mut out = [0u8; BLOCK_HASH_LEN];
    hasher.finalize_xof().fill(&mut out);
    BlockHash(out)
}

/// Compute the 512-bit hash of the given bytes.
pub fn merkle_hash(data: &[u8]) -> MerkleHash {
    let digest = Sha512::digest(data);
    let mut out = [0u8; MERKLE_HASH_LEN];
    out.copy_from_slice(&digest);
    MerkleHash(out)
}

/// Hash two 512-bit nodes into their parent without an intermediate buffer.
pub fn merkle_hash_pair(left: &MerkleHash, right: &MerkleHash) -> MerkleHash {
    let mut hasher = Sha512::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; MERKLE_HASH_LEN];
    out.copy_from_slice(&digest);
    MerkleHash(out)
}
