//! # Block builder
//!
//! Composes an unsealed candidate block for a mining channel: coinbase
//! first, fee-ordered mempool transactions within the size budget, header
//! fields set from the current tip. Proof discovery belongs to the mining
//! collaborator — a nonce search on the work lanes, a stake kernel on the
//! stake lane — after which [`check_work`] routes the sealed block back
//! through normal acceptance.
//!
//! The builder reads the chain only through [`ChainCore`]'s public
//! queries, so a candidate is a consistent snapshot even while network
//! blocks keep arriving.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;
use tracing::debug;

use crate::block::{Block, BlockHeader, Channel, Transaction};
use crate::chain::{Accepted, ChainCore};
use crate::collab::{BlockSigner, Source, TxSource};
use crate::config::{proof_of_work_reward, BUILDER_BLOCK_BUDGET};
use crate::crypto::hash::MerkleHash;
use crate::error::{ChainError, Result};

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// The input tag a builder coinbase carries: height then time, so two
/// coinbases can never hash alike even when paying the same key.
fn coinbase_tag(height: u32, time: u32) -> Vec<u8> {
    let mut tag = bytes::BytesMut::with_capacity(8);
    tag.put_u32_le(height);
    tag.put_u32_le(time);
    tag.to_vec()
}

/// Compose an unsealed candidate on `channel`.
///
/// The coinbase pays `payout_key` the channel's scheduled reward (zero on
/// the stake lane, where the kernel decides the claim), unless
/// `coinbase_override` supplies a prepared coinbase — mining pools hand
/// those in. Returns the candidate with an empty signature and an
/// unsolved nonce.
pub fn create_candidate(
    core: &ChainCore,
    channel: Channel,
    payout_key: &[u8],
    mempool: &dyn TxSource,
    coinbase_override: Option<Transaction>,
) -> Result<Block> {
    let tip = core.tip();
    let bits = core.expected_difficulty(channel);
    let mtp = core.tip_median_time_past();

    let height = tip.height + 1;
    let time = unix_now().max(mtp.saturating_add(1));

    let coinbase = match coinbase_override {
        Some(tx) => {
            if !tx.is_coinbase() {
                return Err(ChainError::InvalidHeader(
                    "coinbase override is not a coinbase".into(),
                ));
            }
            tx
        }
        None => {
            let value = if channel.is_proof_of_work() {
                proof_of_work_reward(bits)
            } else {
                0
            };
            Transaction::coinbase(time, &coinbase_tag(height, time), payout_key, value)
        }
    };

    let mut vtx = vec![coinbase];
    for tx in mempool.select(BUILDER_BLOCK_BUDGET) {
        if tx.is_coinbase() {
            continue; // the mempool must never offer one; drop it cold
        }
        vtx.push(tx);
    }

    let mut candidate = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: tip.hash,
            merkle_root: MerkleHash::ZERO,
            channel: channel.as_u32(),
            height,
            bits,
            nonce: 0,
            time,
        },
        vtx,
        signature: Vec::new(),
    };
    candidate.update_time(unix_now(), mtp);
    candidate.header.merkle_root = candidate.build_merkle_root();

    debug!(
        channel = %channel,
        height,
        bits = %format!("0x{bits:08x}"),
        txs = candidate.vtx.len(),
        "candidate composed"
    );
    Ok(candidate)
}

/// Sign a sealed block with the key that found it. Call after the proof
/// is in place; signing earlier is wasted, the signature covers the hash.
pub fn sign_block(block: &mut Block, signer: &dyn BlockSigner) -> Result<()> {
    block.signature = signer.sign(&block.signature_hash())?;
    Ok(())
}

/// Hand a sealed, signed block into the chain. Refuses stale candidates
/// (the tip moved while the proof was being found) before running the
/// full acceptance pipeline.
pub fn check_work(core: &ChainCore, sealed: Block) -> Result<Accepted> {
    let tip = core.tip();
    if sealed.header.prev_hash != tip.hash {
        return Err(ChainError::InvalidContext(format!(
            "generated block is stale: built on {}, tip is {}",
            sealed.header.prev_hash.short(),
            tip.hash.short()
        )));
    }
    core.process_block(Source::Local, sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::collab::NoMempool;
    use crate::config::ChainParams;
    use crate::crypto::sig::SoloSigner;
    use crate::ledger::MemoryLedger;
    use crate::validate::difficulty::Target;

    fn core() -> (ChainCore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let core = ChainCore::open(
            dir.path(),
            ChainParams::regtest(),
            Arc::new(MemoryLedger::new()),
            None,
        )
        .unwrap();
        (core, dir)
    }

    fn solve_pow(block: &mut Block) {
        let target = Target::from_compact(block.header.bits);
        while !target.is_met_by(&block.hash()) {
            block.header.nonce += 1;
        }
    }

    struct OneTx(Transaction);
    impl TxSource for OneTx {
        fn select(&self, _budget: usize) -> Vec<Transaction> {
            vec![self.0.clone()]
        }
    }

    #[test]
    fn candidate_extends_tip() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);
        let candidate = create_candidate(
            &core,
            Channel::Alpha,
            &signer.payout_key(),
            &NoMempool,
            None,
        )
        .unwrap();

        let tip = core.tip();
        assert_eq!(candidate.header.prev_hash, tip.hash);
        assert_eq!(candidate.header.height, tip.height + 1);
        assert_eq!(candidate.header.channel, 1);
        assert_eq!(candidate.header.bits, core.expected_difficulty(Channel::Alpha));
        assert!(candidate.signature.is_empty());
        assert!(candidate.vtx[0].is_coinbase());
        assert_eq!(candidate.header.merkle_root, candidate.build_merkle_root());
        assert!(candidate.header.time > core.tip_median_time_past());
    }

    #[test]
    fn coinbase_pays_the_schedule() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);
        let candidate = create_candidate(
            &core,
            Channel::Beta,
            &signer.payout_key(),
            &NoMempool,
            None,
        )
        .unwrap();
        assert_eq!(
            candidate.vtx[0].total_out(),
            proof_of_work_reward(candidate.header.bits)
        );
        assert_eq!(
            candidate.vtx[0].payout_key().unwrap(),
            signer.payout_key().as_slice()
        );
    }

    #[test]
    fn stake_candidate_claims_nothing_upfront() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);
        let candidate = create_candidate(
            &core,
            Channel::Stake,
            &signer.payout_key(),
            &NoMempool,
            None,
        )
        .unwrap();
        assert_eq!(candidate.vtx[0].total_out(), 0);
    }

    #[test]
    fn mempool_transactions_ride_behind_coinbase() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);
        let tx = Transaction {
            version: 1,
            time: unix_now(),
            inputs: vec![crate::block::TxInput {
                prevout: crate::block::OutPoint {
                    tx: crate::crypto::hash::merkle_hash(b"funding"),
                    index: 0,
                },
                script: vec![],
            }],
            outputs: vec![crate::block::TxOutput {
                value: 10,
                script: vec![0u8; 32],
            }],
        };
        let candidate = create_candidate(
            &core,
            Channel::Alpha,
            &signer.payout_key(),
            &OneTx(tx.clone()),
            None,
        )
        .unwrap();
        assert_eq!(candidate.vtx.len(), 2);
        assert!(candidate.vtx[0].is_coinbase());
        assert_eq!(candidate.vtx[1], tx);
    }

    #[test]
    fn coinbase_override_must_be_a_coinbase() {
        let (core, _dir) = core();
        let not_coinbase = Transaction {
            version: 1,
            time: 0,
            inputs: vec![crate::block::TxInput {
                prevout: crate::block::OutPoint {
                    tx: crate::crypto::hash::merkle_hash(b"x"),
                    index: 0,
                },
                script: vec![],
            }],
            outputs: vec![],
        };
        assert!(create_candidate(&core, Channel::Alpha, &[0u8; 32], &NoMempool, Some(not_coinbase)).is_err());
    }

    #[test]
    fn sealed_candidate_connects() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);
        let mut candidate = create_candidate(
            &core,
            Channel::Alpha,
            &signer.payout_key(),
            &NoMempool,
            None,
        )
        .unwrap();
        solve_pow(&mut candidate);
        sign_block(&mut candidate, &signer).unwrap();

        assert_eq!(check_work(&core, candidate).unwrap(), Accepted::Connected);
        assert_eq!(core.tip().height, 1);
    }

    #[test]
    fn stale_candidate_refused() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);

        // Build two candidates off the same tip; connect the first.
        let mut first = create_candidate(&core, Channel::Alpha, &signer.payout_key(), &NoMempool, None).unwrap();
        let mut second = create_candidate(&core, Channel::Beta, &signer.payout_key(), &NoMempool, None).unwrap();
        solve_pow(&mut first);
        sign_block(&mut first, &signer).unwrap();
        check_work(&core, first).unwrap();

        solve_pow(&mut second);
        sign_block(&mut second, &signer).unwrap();
        assert!(matches!(
            check_work(&core, second),
            Err(ChainError::InvalidContext(_))
        ));
    }

    #[test]
    fn consecutive_candidates_have_distinct_coinbases() {
        let (core, _dir) = core();
        let signer = SoloSigner::from_seed(&[1u8; 32]);

        let mut first = create_candidate(&core, Channel::Alpha, &signer.payout_key(), &NoMempool, None).unwrap();
        solve_pow(&mut first);
        sign_block(&mut first, &signer).unwrap();
        let first_cb = first.vtx[0].hash();
        check_work(&core, first).unwrap();

        let second = create_candidate(&core, Channel::Alpha, &signer.payout_key(), &NoMempool, None).unwrap();
        assert_ne!(second.vtx[0].hash(), first_cb);
    }
}
