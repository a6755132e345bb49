// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Gossip Node
//!
//! Entry point for the `gossip-node` binary. Parses CLI arguments,
//! initializes logging, wires an in-memory ledger and peer set around
//! `gossip-core`, and runs the accept loop and the peer `advance()` driver
//! until interrupted.
//!
//! The binary supports two subcommands:
//!
//! - `run`     — start the node
//! - `version` — print build version information

mod cli;
mod ledger;
mod logging;
mod runtime;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gossip_core::config::CoreConfig;
use gossip_core::node::{Hash, Node, PeerTarget};
use gossip_core::peer::PeerUrl;
use gossip_core::server::Server;
use tokio::signal;
use uuid::Uuid;

use cli::{Commands, GossipNodeCli};
use ledger::MemoryLedger;
use logging::LogFormat;
use runtime::GossipNode;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GossipNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — node startup sequence
// ---------------------------------------------------------------------------

/// Starts the node.
///
/// Startup sequence:
/// 1. Initialize logging
/// 2. Build the in-memory ledger and the local node identity
/// 3. Bind the listen port and start the accept loop
/// 4. Dial seed peers
/// 5. Run the `advance()` driver until interrupted
/// 6. Graceful shutdown
async fn run_node(args: cli::RunArgs) -> Result<()> {
    // --- 1. Initialize logging ---
    let log_format = if args.log_json { LogFormat::Json } else { LogFormat::Pretty };
    let log_filter = format!("gossip_node={level},gossip_core={level}", level = args.log_level);
    logging::init_logging(&log_filter, log_format);

    let uuid = Uuid::new_v4();
    tracing::info!(%uuid, listen_port = args.listen_port, genesis = %args.genesis, "starting gossip-node");

    // --- 2. Build the ledger and the local node identity ---
    let config = Arc::new(CoreConfig {
        supports_outgoing: args.listen_port != 0,
        ..CoreConfig::default()
    });
    let ledger = Arc::new(MemoryLedger::new(Hash::new(&args.genesis)));
    let node = GossipNode::new(uuid, args.listen_port, ledger, Arc::clone(&config));

    // --- 3. Bind the listen port and start the accept loop ---
    let server = Server::new(args.listen_port, Arc::clone(&config), Arc::downgrade(&node) as std::sync::Weak<dyn Node>);
    let server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "gossip server exited");
            }
        })
    };

    // --- 4. Dial seed peers ---
    for seed in &args.seeds {
        match PeerUrl::parse(seed) {
            Ok(url) => node.add_peer(PeerTarget::Url(url)).await,
            Err(e) => tracing::warn!(seed, error = %e, "ignoring malformed seed peer url"),
        }
    }

    // --- 5. Run the advance() driver until interrupted ---
    let advance_interval = config.advance_interval;
    let driver_node = Arc::clone(&node);
    let driver_task = tokio::spawn(async move { run_advance_loop(driver_node, advance_interval).await });

    tracing::info!("gossip-node is running; press ctrl-c to stop");
    wait_for_shutdown_signal().await.context("failed to install shutdown signal handler")?;

    // --- 6. Graceful shutdown ---
    tracing::info!("shutdown signal received, stopping");
    driver_task.abort();
    server_task.abort();
    Ok(())
}

/// Tick every `interval`, calling `advance()` on every currently-tracked
/// peer. Peers never block this loop: `Peer::advance` spawns its own
/// background work (connects, queries) rather than awaiting them inline.
async fn run_advance_loop(node: Arc<GossipNode>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let peers = node.peers_snapshot();
        tracing::debug!(count = peers.len(), "advancing peers");
        for peer in peers {
            peer.advance().await;
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    signal::ctrl_c().await?;
    Ok(())
}

fn print_version() {
    println!("gossip-node {}", env!("CARGO_PKG_VERSION"));
}
