//! # Collaborator seams
//!
//! The chain core touches the rest of the node through four narrow
//! traits. Transactions are opaque here: script evaluation, balance
//! rules, and signature policy belong to the transaction engine behind
//! [`TxLedger`]. Keys live in the wallet behind [`BlockSigner`]. The
//! network is a single "ask this peer for that block" verb, and the
//! mempool is a single fee-ordered selection call.
//!
//! Everything is object-safe so the node wires concrete services in at
//! startup and the tests wire in doubles.

use crate::block::Transaction;
use crate::crypto::hash::BlockHash;
use crate::error::Result;

/// Identifies the peer a block arrived from.
pub type PeerId = u64;

/// Where a block entered the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Produced locally by the builder / miner.
    Local,
    /// Relayed by a network peer.
    Peer(PeerId),
}

/// The transaction engine's view of coin state.
///
/// `connect_inputs` applies one transaction's full coin update — verify
/// each spent input is unspent and authorized, mark it spent, add the new
/// outputs — and `disconnect_inputs` reverses exactly that. The chain
/// core calls them in block order on connect and reverse order on
/// disconnect, under the chain mutex.
pub trait TxLedger: Send + Sync {
    /// Context-free transaction validity (structure, value ranges).
    fn check_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Apply the transaction's coin update at the given block height.
    /// Coinbase spends must be at least `coinbase_maturity` blocks deep.
    fn connect_inputs(&self, tx: &Transaction, height: u32, coinbase_maturity: u32) -> Result<()>;

    /// Reverse a previously applied coin update.
    fn disconnect_inputs(&self, tx: &Transaction) -> Result<()>;
}

/// Wallet-side signing for sealed blocks.
pub trait BlockSigner {
    /// Sign the block's signature hash with the key that found the block.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// The raw verifying key the coinbase pays and the signature check
    /// verifies against.
    fn payout_key(&self) -> Vec<u8>;
}

/// Outbound block requests toward the networking layer.
pub trait BlockRequester: Send + Sync {
    /// Ask `peer` to send the block with the given hash. Fire-and-forget;
    /// retry and backoff live in the request layer.
    fn ask_for_block(&self, peer: PeerId, hash: BlockHash);
}

/// Mempool transaction selection for the block builder.
pub trait TxSource: Send + Sync {
    /// Fee-ordered, non-conflicting transactions whose combined encoding
    /// stays within `budget` bytes. Never includes a coinbase.
    fn select(&self, budget: usize) -> Vec<Transaction>;
}

/// An empty mempool; the builder produces coinbase-only candidates.
pub struct NoMempool;

impl TxSource for NoMempool {
    fn select(&self, _budget: usize) -> Vec<Transaction> {
        Vec::new()
    }
}
