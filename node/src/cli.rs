//! # CLI Interface
//!
//! Defines the command-line argument structure for `gossip-node` using
//! `clap` derive. Supports two subcommands: `run` and `version`.

use clap::{Parser, Subcommand};

/// Gossip and peer-management node.
///
/// A thin runtime around the `gossip-core` library: binds a listen port,
/// dials a set of seed peers, and drives the peer state machine forward.
/// Carries no consensus, no persistent storage, and no RPC/HTTP surface —
/// those are an embedder's concern, not this binary's.
#[derive(Parser, Debug)]
#[command(
    name = "gossip-node",
    about = "Gossip and peer-management node",
    version,
    propagate_version = true
)]
pub struct GossipNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the gossip node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node: bind the listen port, dial seed peers, and run the
    /// accept/advance loops until interrupted.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port to listen on for incoming gossip connections. 0 disables
    /// incoming connections entirely (a pure-passive node).
    #[arg(long, short = 'p', env = "GOSSIP_LISTEN_PORT", default_value_t = 9740)]
    pub listen_port: u16,

    /// Seed peer URL to dial at startup, e.g.
    /// `gossip://<uuid>@host:port/`. May be repeated.
    #[arg(long = "seed", env = "GOSSIP_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<String>,

    /// Genesis hash identifying the chain this node's in-memory ledger
    /// starts from. Peers reporting a different genesis are ignored.
    #[arg(long, env = "GOSSIP_GENESIS", default_value = "genesis")]
    pub genesis: String,

    /// Log level when `RUST_LOG` is not set. Typical values: `info`,
    /// `debug`, `gossip_node=debug,gossip_core=trace`.
    #[arg(long, env = "GOSSIP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of pretty-printed text.
    #[arg(long, env = "GOSSIP_LOG_JSON")]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        GossipNodeCli::command().debug_assert();
    }
}
