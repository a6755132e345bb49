// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Gossip Core
//!
//! The gossip and peer-management core of a small blockchain node: peer
//! discovery and lifecycle, a symmetric request/reply protocol over a
//! bidirectional message channel, block/transaction dissemination, and a
//! throttled inbound work queue per peer.
//!
//! The ledger, the miner, the REST/HTTP surface, and consensus itself are
//! explicitly out of scope — this crate depends on them only through the
//! [`node::Node`] and [`node::Ledger`] collaborator traits. An embedder
//! supplies concrete implementations and wires the [`server::Server`]'s
//! accept loop and each [`peer::Peer`]'s poll cadence into its own runtime.
//!
//! ## Modules
//!
//! - **gossip** — the wire enum and its (de)serialization to/from the
//!   `[counter, object]` frame shape.
//! - **connection** — `PeerConnection`'s request/reply correlation, plus
//!   the `Incoming`/`Outgoing` transports and handshake.
//! - **throttle** — the bounded, rate-limited FIFO each peer uses for its
//!   inbound request queue.
//! - **peer** — the per-peer state machine, its URL type, and the inbound
//!   request handler.
//! - **server** — the accept loop that turns incoming channels into peers.
//! - **node** — the `Node`/`Ledger` collaborator traits this crate depends
//!   on, and the small value types (`Hash`, `OpaquePayload`, `Candidate`)
//!   that cross that boundary.
//! - **config** — tunable parameters consumed throughout the core.

pub mod config;
pub mod connection;
pub mod gossip;
pub mod node;
pub mod peer;
pub mod server;
pub mod throttle;
