//! # CLI interface
//!
//! Command-line argument structure for `trident-node`, via `clap` derive.
//! Four subcommands: `run`, `init`, `status`, and `version`.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Trident network node.
///
/// Runs the block and chain-state core with a development miner, and
/// offers offline data-directory inspection.
#[derive(Parser, Debug)]
#[command(
    name = "trident-node",
    about = "Trident network node",
    version,
    propagate_version = true
)]
pub struct TridentNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory: keys, genesis block, index store.
    Init(InitArgs),
    /// Print chain status from a data directory as JSON.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Node data directory (block files, index store, keys).
    #[arg(long, short = 'd', env = "TRIDENT_DATA_DIR", default_value = "~/.trident")]
    pub data_dir: PathBuf,

    /// Network to join: mainnet or regtest.
    #[arg(long, env = "TRIDENT_NETWORK", default_value = "mainnet")]
    pub network: String,

    /// Run the development miner, sealing blocks on the two work lanes.
    #[arg(long)]
    pub mine: bool,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format: pretty or json.
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "TRIDENT_DATA_DIR", default_value = "~/.trident")]
    pub data_dir: PathBuf,

    /// Network to configure: mainnet or regtest.
    #[arg(long, default_value = "mainnet")]
    pub network: String,

    /// Overwrite an already-initialized directory.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Data directory to inspect. The node must not be running.
    #[arg(long, short = 'd', env = "TRIDENT_DATA_DIR", default_value = "~/.trident")]
    pub data_dir: PathBuf,

    /// Network the directory belongs to.
    #[arg(long, default_value = "mainnet")]
    pub network: String,
}

/// Expand a leading `~` to the user's home directory.
pub fn resolve_data_dir(raw: &Path) -> PathBuf {
    let s = raw.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    raw.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        TridentNodeCli::command().debug_assert();
    }

    #[test]
    fn tilde_expansion() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            resolve_data_dir(Path::new("~/.trident")),
            PathBuf::from("/home/tester/.trident")
        );
        assert_eq!(
            resolve_data_dir(Path::new("/abs/path")),
            PathBuf::from("/abs/path")
        );
    }
}
