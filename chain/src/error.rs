//! Error model for the chain core.
//!
//! Every failure the core can produce is one of the variants below, and the
//! variant decides the caller's disposition:
//!
//! - `Malformed`, `InvalidHeader`, `InvalidContext` — reject the block,
//!   optionally penalize the source peer, persist nothing.
//! - `MissingParent` — never surfaces from [`ChainCore::process_block`];
//!   the block is parked in the orphan pool instead. The variant exists for
//!   internal plumbing and for callers that bypass the orphan path.
//! - `DiskFull`, `DiskCorrupt`, `IndexCorrupt` — fatal for the chain core.
//!   The core refuses further acceptance once one of these is seen.
//! - `Shutdown` — the process-wide shutdown flag is set; stop feeding blocks.
//! - `Internal` — an invariant was violated; treat as fatal.
//!
//! Duplicate submission is *not* an error: `process_block` reports it as
//! [`Accepted::Duplicate`](crate::chain::Accepted) and leaves state untouched.
//!
//! [`ChainCore::process_block`]: crate::chain::ChainCore::process_block

use thiserror::Error;

/// Errors produced by the block and chain-state core.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Decode failure, bad length prefix, or bad framing magic.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// A header-level rule failed: proof of work, block signature,
    /// timestamp drift, or Merkle root mismatch.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A contextual rule failed: height continuity, expected difficulty,
    /// median-time-past, or checkpoint compliance.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// The block's parent is not in the index.
    #[error("missing parent {0}")]
    MissingParent(String),

    /// Free space exhausted while appending to the block files.
    #[error("disk full")]
    DiskFull,

    /// A block file record failed its magic or length check, or re-read
    /// bytes did not decode.
    #[error("block file corrupt: {0}")]
    DiskCorrupt(String),

    /// The index store is unreadable or internally inconsistent.
    #[error("index store corrupt: {0}")]
    IndexCorrupt(String),

    /// The process-wide shutdown flag is set; no new acceptance started.
    #[error("shutting down")]
    Shutdown,

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChainError {
    /// True for the variants that poison the core: once seen, further
    /// acceptance must be refused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChainError::DiskFull
                | ChainError::DiskCorrupt(_)
                | ChainError::IndexCorrupt(_)
                | ChainError::Internal(_)
        )
    }
}

impl From<sled::Error> for ChainError {
    fn from(e: sled::Error) -> Self {
        ChainError::IndexCorrupt(e.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        // ENOSPC and friends are the one I/O failure with a dedicated
        // disposition; everything else is corruption as far as the chain
        // core is concerned.
        if e.raw_os_error() == Some(28) {
            ChainError::DiskFull
        } else {
            ChainError::DiskCorrupt(e.to_string())
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChainError>;
