//! # Runtime Node
//!
//! [`GossipNode`] is the binary's [`Node`] collaborator: it tracks the peer
//! set in a [`DashMap`], forwards gossiped blocks/transactions to its
//! [`Ledger`], and exposes the accessors `Peer`/`Server` need. `main.rs`
//! owns the accept loop and the periodic `advance()` driver; this struct
//! just holds the state they act on.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use gossip_core::config::CoreConfig;
use gossip_core::node::{Candidate, Ledger, LedgerError, Node, OpaquePayload, PeerTarget};
use gossip_core::peer::{Peer, PeerUrl};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct GossipNode {
    uuid: Uuid,
    port: u16,
    ledger: Arc<dyn Ledger>,
    peers: DashMap<Uuid, Arc<Peer>>,
    config: Arc<CoreConfig>,
    self_weak: Weak<GossipNode>,
}

impl GossipNode {
    pub fn new(uuid: Uuid, port: u16, ledger: Arc<dyn Ledger>, config: Arc<CoreConfig>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            uuid,
            port,
            ledger,
            peers: DashMap::new(),
            config,
            self_weak: weak_self.clone(),
        })
    }

    fn weak_self(&self) -> Weak<dyn Node> {
        self.self_weak.clone() as Weak<dyn Node>
    }

    /// Every peer currently tracked, for the caller's `advance()` driver.
    pub fn peers_snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl Node for GossipNode {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn add_peer(&self, target: PeerTarget) {
        match target {
            PeerTarget::Url(url) => {
                if url.uuid == self.uuid {
                    return;
                }
                if self.peers.contains_key(&url.uuid) {
                    return;
                }
                info!(uuid = %url.uuid, url = %url, "learned peer");
                let peer = Peer::new(url.clone(), self.weak_self(), Arc::clone(&self.config));
                self.peers.insert(url.uuid, peer);
            }
            PeerTarget::Incoming(peer) => {
                info!(uuid = %peer.uuid, "registered incoming peer");
                self.peers.insert(peer.uuid, peer);
            }
        }
    }

    async fn forget(&self, peer_uuid: Uuid) {
        if let Some((_, peer)) = self.peers.remove(&peer_uuid) {
            debug!(uuid = %peer_uuid, "forgetting peer");
            peer.destroy();
        }
    }

    async fn receive_best(&self, candidate: Candidate) {
        if candidate.height > self.ledger.height() {
            info!(
                peer = %candidate.peer,
                hash = %candidate.hash,
                height = candidate.height,
                "peer reports a taller chain"
            );
        }
    }

    async fn receive_transaction(&self, tx: OpaquePayload, from: Uuid) -> Result<(), LedgerError> {
        let result = self.ledger.ingest_transaction(tx);
        if let Err(e) = &result {
            warn!(peer = %from, error = %e, "rejected transaction");
        }
        result
    }

    async fn receive_block(&self, block: OpaquePayload, from: Uuid, was_requested: bool) -> Result<(), LedgerError> {
        let result = self.ledger.ingest_block(block, was_requested);
        if let Err(e) = &result {
            warn!(peer = %from, error = %e, "rejected block");
        }
        result
    }

    fn valid_peers(&self) -> Vec<PeerUrl> {
        self.peers
            .iter()
            .filter(|entry| entry.value().has_connection())
            .map(|entry| entry.value().url.clone())
            .collect()
    }

    fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    fn median_network_time(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
