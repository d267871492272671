// Copyright (c) 2026 Trident Developers. MIT License.
// See LICENSE for details.

//! # Trident node
//!
//! Entry point for the `trident-node` binary. Parses CLI arguments,
//! initializes logging, opens the chain core, and supervises the optional
//! development miner until a shutdown signal arrives.
//!
//! Subcommands:
//!
//! - `run`     — open the chain and serve until SIGINT/SIGTERM
//! - `init`    — create the data directory, keys, and genesis block
//! - `status`  — print chain status from a data directory as JSON
//! - `version` — print build version information

mod cli;
mod logging;
mod miner;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::signal;

use trident_chain::crypto::sig::SoloSigner;
use trident_chain::{ChainCore, ChainParams, Channel, MemoryLedger};

use cli::{Commands, TridentNodeCli};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TridentNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => print_status(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Resolve the chain parameters a `--network` flag names.
fn params_for(network: &str) -> Result<ChainParams> {
    match network {
        "mainnet" => Ok(ChainParams::mainnet()),
        "regtest" => Ok(ChainParams::regtest()),
        other => anyhow::bail!("unknown network {other:?} (expected mainnet or regtest)"),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Full node startup: logging, keys, chain core, miner, shutdown handling.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        &format!(
            "trident_node={level},trident_chain={level}",
            level = args.log_level
        ),
        LogFormat::from_str_lossy(&args.log_format),
    );

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    let params = params_for(&args.network)?;

    tracing::info!(
        data_dir = %data_dir.display(),
        network = %args.network,
        mine = args.mine,
        "starting trident-node"
    );

    let signer = Arc::new(load_or_generate_key(&data_dir)?);
    let ledger = Arc::new(MemoryLedger::new());
    let core = Arc::new(
        ChainCore::open(&data_dir, params, ledger, None)
            .with_context(|| format!("failed to open chain at {}", data_dir.display()))?,
    );

    let tip = core.tip();
    tracing::info!(
        height = tip.height,
        tip = %tip.hash.short(),
        trust = tip.chain_trust,
        initial_download = core.is_initial_download(),
        "chain ready"
    );

    let miner_handle = if args.mine {
        Some(miner::spawn(Arc::clone(&core), Arc::clone(&signer)))
    } else {
        None
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    core.begin_shutdown();
    if let Some(handle) = miner_handle {
        if handle.join().is_err() {
            tracing::warn!("miner thread panicked during shutdown");
        }
    }

    let tip = core.tip();
    tracing::info!(height = tip.height, tip = %tip.hash.short(), "trident-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Initialize a data directory: key material plus the genesis block.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("trident_node=info", LogFormat::Pretty);

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    let params = params_for(&args.network)?;

    let key_path = data_dir.join("keys").join("miner.key");
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "data directory already initialized at {}. Use --force to overwrite.",
            data_dir.display()
        );
    }

    std::fs::create_dir_all(data_dir.join("keys"))
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let signer = generate_key(&data_dir)?;

    // Opening an empty chain writes the genesis block and index.
    let core = ChainCore::open(
        &data_dir,
        params,
        Arc::new(MemoryLedger::new()),
        None,
    )?;
    let genesis = core.genesis_hash();

    println!();
    println!("Node initialized.");
    println!();
    println!("  Data directory : {}", data_dir.display());
    println!("  Network        : {}", args.network);
    println!("  Payout key     : {}", hex::encode(signer.public_key_bytes()));
    println!("  Genesis        : {}", genesis.short());
    println!();
    println!(
        "Run `trident-node run -d {} --network {}` to start.",
        data_dir.display(),
        args.network
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

/// Machine-readable chain status, printed to stdout as JSON.
#[derive(Serialize)]
struct ChainStatus {
    network: String,
    tip_hash: String,
    height: u32,
    chain_trust: u64,
    supply: i64,
    blocks_indexed: usize,
    channel_heights: [u32; 3],
    initial_download: bool,
}

fn print_status(args: cli::StatusArgs) -> Result<()> {
    let data_dir = cli::resolve_data_dir(&args.data_dir);
    let params = params_for(&args.network)?;

    let core = ChainCore::open(&data_dir, params, Arc::new(MemoryLedger::new()), None)
        .with_context(|| {
            format!(
                "failed to open chain at {} (is the node running?)",
                data_dir.display()
            )
        })?;

    let tip = core.tip();
    let status = ChainStatus {
        network: args.network,
        tip_hash: tip.hash.to_hex(),
        height: tip.height,
        chain_trust: tip.chain_trust,
        supply: tip.supply,
        blocks_indexed: core.block_count(),
        channel_heights: [
            core.channel_height(Channel::Stake),
            core.channel_height(Channel::Alpha),
            core.channel_height(Channel::Beta),
        ],
        initial_download: core.is_initial_download(),
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

fn print_version() {
    println!("trident-node {}", env!("CARGO_PKG_VERSION"));
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit     {commit}");
    }
}

// ---------------------------------------------------------------------------
// Key persistence
// ---------------------------------------------------------------------------

/// Load the miner key from `{data_dir}/keys/miner.key`, generating and
/// saving one on first run. The file holds a hex-encoded 32-byte seed,
/// owner-readable only on Unix.
fn load_or_generate_key(data_dir: &Path) -> Result<SoloSigner> {
    let key_path = data_dir.join("keys").join("miner.key");
    if key_path.exists() {
        let hex_str = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read {}", key_path.display()))?;
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| anyhow::anyhow!("invalid key file {}: {e}", key_path.display()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("key file {} is not 32 bytes", key_path.display()))?;
        Ok(SoloSigner::from_seed(&seed))
    } else {
        generate_key(data_dir)
    }
}

/// Generate a fresh miner key and persist its seed.
fn generate_key(data_dir: &Path) -> Result<SoloSigner> {
    let keys_dir = data_dir.join("keys");
    std::fs::create_dir_all(&keys_dir)
        .with_context(|| format!("failed to create {}", keys_dir.display()))?;

    let seed: [u8; 32] = rand::random();
    let key_path = keys_dir.join("miner.key");
    std::fs::write(&key_path, hex::encode(seed))
        .with_context(|| format!("failed to write {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(key_path = %key_path.display(), "generated miner key");
    Ok(SoloSigner::from_seed(&seed))
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Wait for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. On
/// non-Unix platforms only Ctrl+C is wired.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
