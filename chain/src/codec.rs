//! # Deterministic binary codec
//!
//! One byte layout, shared by the wire and the disk: integers are
//! little-endian, hashes are raw fixed-width bytes, and variable-length
//! sequences carry a `u32` length prefix. There is no schema negotiation
//! and no versioned framing here — the layout *is* the protocol, which is
//! why this module is explicit byte plumbing instead of a serde derive.
//!
//! Encoding writes into a [`BytesMut`]; decoding reads from a `&[u8]`
//! cursor and is fully length-checked. A decoder never panics on hostile
//! input: every shortfall or oversized prefix surfaces as
//! [`ChainError::Malformed`].

use bytes::{Buf, BufMut, BytesMut};

use crate::crypto::hash::{BlockHash, MerkleHash, BLOCK_HASH_LEN, MERKLE_HASH_LEN};
use crate::error::{ChainError, Result};

/// Hard cap on any single length prefix. Nothing the chain core decodes
/// legitimately exceeds the block body cap, so a prefix above this is an
/// attack or corruption, not data.
pub const MAX_DECODE_LEN: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

pub fn put_u32(out: &mut BytesMut, v: u32) {
    out.put_u32_le(v);
}

pub fn put_u64(out: &mut BytesMut, v: u64) {
    out.put_u64_le(v);
}

pub fn put_i64(out: &mut BytesMut, v: i64) {
    out.put_i64_le(v);
}

pub fn put_block_hash(out: &mut BytesMut, h: &BlockHash) {
    out.put_slice(h.as_bytes());
}

pub fn put_merkle_hash(out: &mut BytesMut, h: &MerkleHash) {
    out.put_slice(h.as_bytes());
}

/// Write a `u32` length prefix followed by the raw bytes.
pub fn put_var_bytes(out: &mut BytesMut, bytes: &[u8]) {
    out.put_u32_le(bytes.len() as u32);
    out.put_slice(bytes);
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn need(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(ChainError::Malformed(format!(
            "truncated while reading {what}: need {n}, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

pub fn get_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    need(buf, 8, what)?;
    Ok(buf.get_u64_le())
}

pub fn get_i64(buf: &mut &[u8], what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64_le())
}

pub fn get_block_hash(buf: &mut &[u8], what: &str) -> Result<BlockHash> {
    need(buf, BLOCK_HASH_LEN, what)?;
    let mut out = [0u8; BLOCK_HASH_LEN];
    buf.copy_to_slice(&mut out);
    Ok(BlockHash(out))
}

pub fn get_merkle_hash(buf: &mut &[u8], what: &str) -> Result<MerkleHash> {
    need(buf, MERKLE_HASH_LEN, what)?;
    let mut out = [0u8; MERKLE_HASH_LEN];
    buf.copy_to_slice(&mut out);
    Ok(MerkleHash(out))
}

/// Read a `u32` length prefix and the bytes it announces.
pub fn get_var_bytes(buf: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = get_u32(buf, what)? as usize;
    if len > MAX_DECODE_LEN {
        return Err(ChainError::Malformed(format!(
            "length prefix for {what} is {len}, cap is {MAX_DECODE_LEN}"
        )));
    }
    need(buf, len, what)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Read a `u32` element count, bounds-checked against `MAX_DECODE_LEN`
/// divided by a caller-supplied minimum element size. Keeps a hostile
/// count from pre-allocating gigabytes.
pub fn get_count(buf: &mut &[u8], min_elem_size: usize, what: &str) -> Result<usize> {
    let count = get_u32(buf, what)? as usize;
    let cap = MAX_DECODE_LEN / min_elem_size.max(1);
    if count > cap {
        return Err(ChainError::Malformed(format!(
            "element count for {what} is {count}, cap is {cap}"
        )));
    }
    Ok(count)
}

/// Fail if any input remains: every decoder in this crate consumes its
/// slice exactly, so trailing bytes mean a framing bug or tampering.
pub fn expect_eof(buf: &[u8], what: &str) -> Result<()> {
    if !buf.is_empty() {
        return Err(ChainError::Malformed(format!(
            "{} trailing bytes after {what}",
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip_little_endian() {
        let mut out = BytesMut::new();
        put_u32(&mut out, 0xA1B2_C3D4);
        put_u64(&mut out, 0x0102_0304_0506_0708);
        put_i64(&mut out, -42);

        // Wire order is little-endian.
        assert_eq!(&out[..4], &[0xD4, 0xC3, 0xB2, 0xA1]);

        let mut buf = &out[..];
        assert_eq!(get_u32(&mut buf, "a").unwrap(), 0xA1B2_C3D4);
        assert_eq!(get_u64(&mut buf, "b").unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(get_i64(&mut buf, "c").unwrap(), -42);
        expect_eof(buf, "ints").unwrap();
    }

    #[test]
    fn var_bytes_round_trip() {
        let mut out = BytesMut::new();
        put_var_bytes(&mut out, b"payload");
        put_var_bytes(&mut out, b"");

        let mut buf = &out[..];
        assert_eq!(get_var_bytes(&mut buf, "a").unwrap(), b"payload");
        assert_eq!(get_var_bytes(&mut buf, "b").unwrap(), b"");
        expect_eof(buf, "var bytes").unwrap();
    }

    #[test]
    fn truncated_input_is_malformed() {
        let mut out = BytesMut::new();
        put_u64(&mut out, 7);
        let mut buf = &out[..5];
        assert!(matches!(
            get_u64(&mut buf, "x"),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        let mut out = BytesMut::new();
        put_u32(&mut out, u32::MAX);
        let mut buf = &out[..];
        assert!(matches!(
            get_var_bytes(&mut buf, "x"),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn length_prefix_larger_than_body_rejected() {
        let mut out = BytesMut::new();
        put_u32(&mut out, 100);
        out.put_slice(b"short");
        let mut buf = &out[..];
        assert!(get_var_bytes(&mut buf, "x").is_err());
    }

    #[test]
    fn hash_round_trip() {
        let h = crate::crypto::hash::block_hash(b"h");
        let m = crate::crypto::hash::merkle_hash(b"m");
        let mut out = BytesMut::new();
        put_block_hash(&mut out, &h);
        put_merkle_hash(&mut out, &m);

        let mut buf = &out[..];
        assert_eq!(get_block_hash(&mut buf, "h").unwrap(), h);
        assert_eq!(get_merkle_hash(&mut buf, "m").unwrap(), m);
    }

    #[test]
    fn trailing_bytes_detected() {
        assert!(expect_eof(&[1, 2, 3], "x").is_err());
        assert!(expect_eof(&[], "x").is_ok());
    }

    #[test]
    fn hostile_count_rejected() {
        let mut out = BytesMut::new();
        put_u32(&mut out, u32::MAX);
        let mut buf = &out[..];
        assert!(get_count(&mut buf, 16, "tx list").is_err());
    }
}
