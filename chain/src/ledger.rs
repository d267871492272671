//! # In-memory UTXO ledger
//!
//! A reference [`TxLedger`] over a plain unspent-output map. The node's
//! dev mode runs against it, and the integration tests use it to observe
//! coin effects across reorgs — reversibility claims are only checkable
//! against a ledger that actually moves coins.
//!
//! Spent outputs are retired into an archive rather than forgotten, so a
//! disconnect can restore exactly what a connect consumed. The archive
//! only ever grows; a production transaction engine would prune it, but
//! this ledger optimizes for auditability, not footprint.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::block::{OutPoint, Transaction, TxOutput};
use crate::error::{ChainError, Result};
use crate::collab::TxLedger;

#[derive(Default)]
struct LedgerState {
    /// Spendable outputs.
    unspent: HashMap<OutPoint, TxOutput>,
    /// Every output ever created, for disconnect restoration.
    archive: HashMap<OutPoint, TxOutput>,
    /// Block height each coinbase output was created at.
    coinbase_height: HashMap<OutPoint, u32>,
}

/// Thread-safe in-memory UTXO set.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger {
        MemoryLedger::default()
    }

    /// Seed an output directly, bypassing transaction flow. Test setup and
    /// dev-mode faucets only.
    pub fn fund(&self, outpoint: OutPoint, output: TxOutput) {
        let mut state = self.state.lock();
        state.archive.insert(outpoint, output.clone());
        state.unspent.insert(outpoint, output);
    }

    /// Snapshot of the unspent set, for equality assertions in tests.
    pub fn unspent_snapshot(&self) -> HashMap<OutPoint, TxOutput> {
        self.state.lock().unspent.clone()
    }

    pub fn unspent_len(&self) -> usize {
        self.state.lock().unspent.len()
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.state.lock().unspent.contains_key(outpoint)
    }
}

impl TxLedger for MemoryLedger {
    fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.inputs.is_empty() {
            return Err(ChainError::InvalidHeader("transaction has no inputs".into()));
        }
        if tx.outputs.is_empty() {
            return Err(ChainError::InvalidHeader("transaction has no outputs".into()));
        }
        if tx.outputs.iter().any(|o| o.value < 0) {
            return Err(ChainError::InvalidHeader("negative output value".into()));
        }
        if tx.is_coinbase() {
            return Ok(());
        }
        // Non-coinbase: no null prevouts, no duplicate spends within the tx.
        let mut seen = std::collections::HashSet::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if input.prevout.is_null() {
                return Err(ChainError::InvalidHeader(
                    "null prevout outside coinbase".into(),
                ));
            }
            if !seen.insert(input.prevout) {
                return Err(ChainError::InvalidHeader("duplicate input in tx".into()));
            }
        }
        Ok(())
    }

    fn connect_inputs(&self, tx: &Transaction, height: u32, coinbase_maturity: u32) -> Result<()> {
        let mut state = self.state.lock();
        let tx_hash = tx.hash();

        if !tx.is_coinbase() {
            // Verify first, mutate after: a half-spent transaction must
            // never escape this function.
            for input in &tx.inputs {
                if !state.unspent.contains_key(&input.prevout) {
                    return Err(ChainError::InvalidContext(format!(
                        "input {}:{} missing or already spent",
                        input.prevout.tx.short(),
                        input.prevout.index
                    )));
                }
                if let Some(created) = state.coinbase_height.get(&input.prevout) {
                    if height < created.saturating_add(coinbase_maturity) {
                        return Err(ChainError::InvalidContext(format!(
                            "coinbase output spent at {} before maturity ({} + {})",
                            height, created, coinbase_maturity
                        )));
                    }
                }
            }
            for input in &tx.inputs {
                state.unspent.remove(&input.prevout);
            }
        }

        for (i, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint {
                tx: tx_hash,
                index: i as u32,
            };
            state.archive.insert(outpoint, output.clone());
            state.unspent.insert(outpoint, output.clone());
            if tx.is_coinbase() {
                state.coinbase_height.insert(outpoint, height);
            }
        }
        Ok(())
    }

    fn disconnect_inputs(&self, tx: &Transaction) -> Result<()> {
        let mut state = self.state.lock();
        let tx_hash = tx.hash();

        // Delete this transaction's outputs from the unspent set.
        for i in 0..tx.outputs.len() {
            let outpoint = OutPoint {
                tx: tx_hash,
                index: i as u32,
            };
            state.unspent.remove(&outpoint);
            state.coinbase_height.remove(&outpoint);
        }

        // Re-mark its spent inputs as unspent.
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let restored = state.archive.get(&input.prevout).cloned().ok_or_else(|| {
                    ChainError::Internal(format!(
                        "disconnect cannot restore unknown output {}:{}",
                        input.prevout.tx.short(),
                        input.prevout.index
                    ))
                })?;
                state.unspent.insert(input.prevout, restored);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::TxInput;

    fn coinbase(seed: u8) -> Transaction {
        Transaction::coinbase(1_000, &[seed], &[seed; 32], 50)
    }

    /// A transaction spending the first output of `from` into one output.
    fn spend(from: &Transaction, value: i64) -> Transaction {
        Transaction {
            version: 1,
            time: 2_000,
            inputs: vec![TxInput {
                prevout: OutPoint {
                    tx: from.hash(),
                    index: 0,
                },
                script: vec![],
            }],
            outputs: vec![TxOutput {
                value,
                script: vec![0xAA; 32],
            }],
        }
    }

    #[test]
    fn connect_adds_outputs() {
        let ledger = MemoryLedger::new();
        let cb = coinbase(1);
        ledger.connect_inputs(&cb, 1, 0).unwrap();
        assert!(ledger.is_unspent(&OutPoint {
            tx: cb.hash(),
            index: 0
        }));
    }

    #[test]
    fn spend_moves_coins() {
        let ledger = MemoryLedger::new();
        let cb = coinbase(1);
        ledger.connect_inputs(&cb, 1, 0).unwrap();

        let tx = spend(&cb, 50);
        ledger.connect_inputs(&tx, 2, 0).unwrap();

        assert!(!ledger.is_unspent(&OutPoint { tx: cb.hash(), index: 0 }));
        assert!(ledger.is_unspent(&OutPoint { tx: tx.hash(), index: 0 }));
    }

    #[test]
    fn double_spend_rejected() {
        let ledger = MemoryLedger::new();
        let cb = coinbase(1);
        ledger.connect_inputs(&cb, 1, 0).unwrap();

        let tx = spend(&cb, 50);
        ledger.connect_inputs(&tx, 2, 0).unwrap();
        assert!(matches!(
            ledger.connect_inputs(&spend(&cb, 40), 3, 0),
            Err(ChainError::InvalidContext(_))
        ));
    }

    #[test]
    fn coinbase_maturity_enforced() {
        let ledger = MemoryLedger::new();
        let cb = coinbase(1);
        ledger.connect_inputs(&cb, 10, 0).unwrap();

        let tx = spend(&cb, 50);
        // Too early at height 50 with maturity 100.
        assert!(ledger.connect_inputs(&tx, 50, 100).is_err());
        // Deep enough at height 110.
        ledger.connect_inputs(&tx, 110, 100).unwrap();
    }

    #[test]
    fn disconnect_restores_exactly() {
        let ledger = MemoryLedger::new();
        let cb = coinbase(1);
        ledger.connect_inputs(&cb, 1, 0).unwrap();
        let before = ledger.unspent_snapshot();

        let tx = spend(&cb, 50);
        ledger.connect_inputs(&tx, 2, 0).unwrap();
        assert_ne!(ledger.unspent_snapshot(), before);

        ledger.disconnect_inputs(&tx).unwrap();
        assert_eq!(ledger.unspent_snapshot(), before);
    }

    #[test]
    fn connect_is_atomic_on_missing_input() {
        let ledger = MemoryLedger::new();
        let cb = coinbase(1);
        ledger.connect_inputs(&cb, 1, 0).unwrap();

        // Two inputs, second one unknown: nothing may change.
        let mut tx = spend(&cb, 50);
        tx.inputs.push(TxInput {
            prevout: OutPoint {
                tx: crate::crypto::hash::merkle_hash(b"phantom"),
                index: 0,
            },
            script: vec![],
        });
        let before = ledger.unspent_snapshot();
        assert!(ledger.connect_inputs(&tx, 2, 0).is_err());
        assert_eq!(ledger.unspent_snapshot(), before);
    }

    #[test]
    fn check_transaction_rules() {
        let ledger = MemoryLedger::new();
        assert!(ledger.check_transaction(&coinbase(1)).is_ok());

        let cb = coinbase(1);
        let ok = spend(&cb, 50);
        assert!(ledger.check_transaction(&ok).is_ok());

        let mut no_inputs = ok.clone();
        no_inputs.inputs.clear();
        assert!(ledger.check_transaction(&no_inputs).is_err());

        let mut negative = ok.clone();
        negative.outputs[0].value = -1;
        assert!(ledger.check_transaction(&negative).is_err());

        let mut dup = ok.clone();
        dup.inputs.push(dup.inputs[0].clone());
        assert!(ledger.check_transaction(&dup).is_err());

        let mut null_prevout = ok;
        null_prevout.inputs[0].prevout = OutPoint::NULL;
        null_prevout.inputs.push(TxInput {
            prevout: OutPoint {
                tx: cb.hash(),
                index: 0,
            },
            script: vec![],
        });
        assert!(ledger.check_transaction(&null_prevout).is_err());
    }
}
