//! # Development miner
//!
//! A single background thread that round-robins the two proof-of-work
//! lanes: compose a candidate, walk nonces until the target is met, sign,
//! and hand the sealed block back through `check_work`. Meant for regtest
//! and small dev networks — the nonce walk is bounded per candidate so the
//! thread notices shutdown promptly even on a hard target.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use trident_chain::builder::{check_work, create_candidate, sign_block};
use trident_chain::collab::{BlockSigner, NoMempool};
use trident_chain::crypto::sig::SoloSigner;
use trident_chain::validate::difficulty::Target;
use trident_chain::{Accepted, ChainCore, ChainError, Channel};

/// Nonces tried per candidate before re-checking shutdown and refreshing
/// the candidate against a possibly moved tip.
const NONCE_BATCH: u64 = 1 << 16;

/// Spawn the miner thread. It stops when the core begins shutdown.
pub fn spawn(core: Arc<ChainCore>, signer: Arc<SoloSigner>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("trident-miner".into())
        .spawn(move || mine_loop(&core, &signer))
        .expect("spawn miner thread")
}

fn mine_loop(core: &ChainCore, signer: &SoloSigner) {
    info!("dev miner started");
    let lanes = [Channel::Alpha, Channel::Beta];
    let mut lane = 0usize;

    while !core.is_shutting_down() {
        let channel = lanes[lane % lanes.len()];
        lane += 1;

        let mut candidate =
            match create_candidate(core, channel, &signer.payout_key(), &NoMempool, None) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(error = %e, "candidate composition failed");
                    std::thread::sleep(std::time::Duration::from_millis(250));
                    continue;
                }
            };

        let target = Target::from_compact(candidate.header.bits);
        let mut solved = false;
        for _ in 0..NONCE_BATCH {
            if target.is_met_by(&candidate.hash()) {
                solved = true;
                break;
            }
            candidate.header.nonce = candidate.header.nonce.wrapping_add(1);
        }
        if !solved {
            // Target too hard for one batch; loop around, shutdown-aware.
            debug!(channel = %channel, "nonce batch exhausted");
            continue;
        }

        if let Err(e) = sign_block(&mut candidate, signer) {
            warn!(error = %e, "sealed block failed to sign");
            continue;
        }

        match check_work(core, candidate) {
            Ok(Accepted::Connected) => {
                let tip = core.tip();
                info!(height = tip.height, channel = %channel, "mined block connected");
            }
            Ok(outcome) => debug!(?outcome, "mined block not on best chain"),
            Err(ChainError::Shutdown) => break,
            Err(ChainError::InvalidContext(_)) => {
                // Tip moved under us; next candidate rebuilds on it.
                debug!("candidate went stale");
            }
            Err(e) => {
                warn!(error = %e, "mined block rejected");
                if e.is_fatal() {
                    break;
                }
            }
        }
    }
    info!("dev miner stopped");
}
