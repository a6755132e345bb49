//! # Node & Ledger Collaborator Traits
//!
//! The gossip core never talks to a concrete blockchain engine. It talks to
//! whatever implements [`Node`] and [`Ledger`] — small capability interfaces
//! that expose exactly the operations `Peer` and `Server` need. A binary
//! wiring this crate together supplies the implementations; the core stays
//! agnostic to storage, consensus, and wire format choices made above it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::peer::{Peer, PeerUrl};

/// A hash rendered as its canonical string form. Opaque to the gossip core —
/// equality and ordering are whatever the underlying string gives us; only
/// the ledger knows how to compute or verify one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(pub String);

impl Hash {
    pub fn new(s: impl Into<String>) -> Self {
        Hash(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Hash {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Hash(s.to_string()))
    }
}

impl From<&str> for Hash {
    fn from(s: &str) -> Self {
        Hash(s.to_string())
    }
}

/// A free-form block or transaction payload. The gossip core never inspects
/// the contents beyond walking the `previous` link to serve `fetch`; typed
/// validation is the ledger's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaquePayload(pub serde_json::Value);

impl OpaquePayload {
    /// The hash this payload claims as its predecessor, if it has one and
    /// the field is a string. Used to walk ancestry when serving `fetch`.
    pub fn previous_hash(&self) -> Option<Hash> {
        self.0
            .as_object()?
            .get("previous")?
            .as_str()
            .map(Hash::new)
    }
}

/// A candidate better chain head reported by a peer's `Index`, forwarded to
/// the ledger for the longest-chain decision. The gossip core makes no
/// consensus judgment of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub hash: Hash,
    pub height: u64,
    pub peer: Uuid,
}

/// What `Node::add_peer` accepts: a URL learned from another peer's Index,
/// or a `Peer` the Server just built around an accepted incoming channel
/// and is handing off so the Node can track it alongside peers it learned
/// about by URL.
pub enum PeerTarget {
    Url(PeerUrl),
    Incoming(Arc<Peer>),
}

/// Errors a `Ledger` implementation may surface while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("block not found: {0}")]
    NotFound(Hash),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// The ledger/blockchain engine, as seen by the gossip core: a source of
/// genesis/head hashes, a way to look up a block by hash, and an ingestion
/// point for blocks and transactions arriving over the wire.
///
/// Implementations own their own locking; the trait never leaks a guard
/// across an await point, and `Peer` always acquires its own mutex before
/// calling into the ledger (never the reverse).
pub trait Ledger: Send + Sync {
    fn genesis_hash(&self) -> Hash;
    fn highest_hash(&self) -> Hash;
    fn height(&self) -> u64;
    fn get_block(&self, hash: &Hash) -> Option<OpaquePayload>;
    fn ingest_block(&self, block: OpaquePayload, was_requested: bool) -> Result<(), LedgerError>;
    fn ingest_transaction(&self, tx: OpaquePayload) -> Result<(), LedgerError>;
}

/// The node-level collaborator consumed by `Peer` and `Server`: identity,
/// peer-set mutation, delivery of gossiped candidates/blocks/transactions,
/// and access to the ledger.
#[async_trait::async_trait]
pub trait Node: Send + Sync {
    fn uuid(&self) -> Uuid;
    fn port(&self) -> u16;

    /// Register a new peer, either from a learned URL or an accepted
    /// incoming connection. Idempotent for URLs already known.
    async fn add_peer(&self, target: PeerTarget);

    /// Permanently drop a peer (it asked to be forgotten, or the embedder
    /// decided to prune it).
    async fn forget(&self, peer_uuid: Uuid);

    /// A peer reported a chain head that might be better than ours.
    async fn receive_best(&self, candidate: Candidate);

    /// An unsolicited (or fetched) transaction arrived from a peer.
    async fn receive_transaction(&self, tx: OpaquePayload, from: Uuid) -> Result<(), LedgerError>;

    /// An unsolicited or fetched block arrived from a peer.
    async fn receive_block(
        &self,
        block: OpaquePayload,
        from: Uuid,
        was_requested: bool,
    ) -> Result<(), LedgerError>;

    /// Peer URLs eligible for inclusion in an outgoing `Index` reply.
    fn valid_peers(&self) -> Vec<PeerUrl>;

    /// Shared ledger handle.
    fn ledger(&self) -> Arc<dyn Ledger>;

    /// Best estimate of the network's median clock, used to compute
    /// `timeDifference` against a peer's reported timestamp.
    fn median_network_time(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips_through_display_and_from_str() {
        let h = Hash::new("abc123");
        let rendered = h.to_string();
        let parsed: Hash = rendered.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn opaque_payload_reads_previous_hash() {
        let payload = OpaquePayload(serde_json::json!({ "previous": "H4", "height": 5 }));
        assert_eq!(payload.previous_hash(), Some(Hash::new("H4")));

        let genesis = OpaquePayload(serde_json::json!({ "height": 0 }));
        assert_eq!(genesis.previous_hash(), None);
    }
}
