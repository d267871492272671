// Copyright (c) 2026 Trident Developers. MIT License.
// See LICENSE for details.

//! # Trident — block & chain-state core
//!
//! The consensus heart of a Trident node: blocks, the block index tree,
//! validation, chain election by accumulated trust, and the storage that
//! keeps all of it honest across crashes.
//!
//! Three mining channels share one chain — proof of stake on channel 0,
//! two independent proof-of-work lanes on channels 1 and 2 — each with
//! its own difficulty trajectory, all feeding one tree whose best path is
//! the maximum-trust route from genesis.
//!
//! ## Module map
//!
//! - **crypto** — the 1024-bit block hash, the 512-bit tx/Merkle hash,
//!   and block signatures.
//! - **codec** — the deterministic byte layout shared by wire and disk.
//! - **block** — blocks, headers, opaque transactions, channels.
//! - **merkle** — tree building, branch extraction, branch checking.
//! - **validate** — stateless and contextual rules, difficulty, trust,
//!   checkpoints.
//! - **index** — the in-memory index tree and its serialized shadow.
//! - **store** — append-only block files and the sled-backed index store.
//! - **chain** — the manager owning acceptance, reorgs, orphans, and
//!   locators.
//! - **builder** — candidate composition for miners and stakers.
//! - **collab** — the seams to the transaction engine, wallet, network,
//!   and mempool.
//! - **ledger** — a reference in-memory UTXO implementation of the
//!   transaction seam.
//!
//! ## Concurrency contract
//!
//! [`ChainCore`](chain::ChainCore) serializes every mutable path behind
//! one process-wide chain mutex; read-only queries share it. Everything
//! else in the crate is plain data. Collaborator calls may block on I/O
//! or crypto; no finer-grained lock is ever held across them.

pub mod block;
pub mod builder;
pub mod chain;
pub mod codec;
pub mod collab;
pub mod config;
pub mod crypto;
pub mod error;
pub mod index;
pub mod ledger;
pub mod merkle;
pub mod store;
pub mod validate;

pub use block::{Block, BlockHeader, Channel, OutPoint, Transaction, TxInput, TxOutput};
pub use chain::{Accepted, BlockLocator, ChainCore, TipInfo};
pub use collab::{BlockRequester, BlockSigner, PeerId, Source, TxLedger, TxSource};
pub use config::ChainParams;
pub use crypto::{BlockHash, MerkleHash};
pub use error::{ChainError, Result};
pub use ledger::MemoryLedger;
