//! Block signatures.
//!
//! Every non-genesis block carries an Ed25519 signature over its identity
//! hash. The key that signs is the block's payout key: the first output
//! script of the coinbase (a raw 32-byte verifying key) — for stake blocks
//! that same slot holds the stake key. Signing itself lives behind the
//! [`BlockSigner`](crate::collab::BlockSigner) seam because keys belong to
//! the wallet, not the chain core; verification is a pure function and
//! lives here.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::collab::BlockSigner;
use crate::error::{ChainError, Result};

/// Verify an Ed25519 block signature.
///
/// `pubkey` is the raw 32-byte verifying key taken from the coinbase payout
/// script. Returns `false` for malformed keys or signatures rather than
/// erroring: a block that fails to parse its own key is simply invalid.
pub fn verify_block_signature(pubkey: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <&[u8; 32]>::try_from(pubkey) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify_strict(message, &sig).is_ok()
}

/// A single-key [`BlockSigner`] backed by an in-memory Ed25519 key.
///
/// This is the signer the node binary and the tests use. A production
/// wallet implements the same trait over its keystore.
pub struct SoloSigner {
    key: SigningKey,
}

impl SoloSigner {
    /// Build a signer from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> SoloSigner {
        SoloSigner {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// The raw verifying key, in the form block coinbase scripts carry.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl BlockSigner for SoloSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig: Signature = self
            .key
            .try_sign(message)
            .map_err(|e| ChainError::Internal(format!("signing failed: {e}")))?;
        Ok(sig.to_bytes().to_vec())
    }

    fn payout_key(&self) -> Vec<u8> {
        self.public_key_bytes().to_vec()
    }
}
