//! # Server
//!
//! Accepts incoming channels on the node's listen port, validates the
//! gossip handshake, and wires each one up as a [`Peer`] — registering it
//! under its connection id and handing it off to the [`Node`] collaborator.
//! The accept loop itself never touches gossip frames: each
//! accepted connection's read loop runs on its own spawned task so one slow
//! or malicious peer can't stall new connections from being accepted.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::connection::IncomingConnection;
use crate::node::{Node, PeerTarget};
use crate::peer::Peer;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listen port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("accept failed: {0}")]
    Accept(#[from] std::io::Error),
}

/// Accepts gossip channels and turns them into [`Peer`]s.
///
/// `connections` maps each accepted peer's uuid to its `Peer` — the entry
/// is the only strong owner of that `Peer`/`PeerConnection` pair while the
/// channel is open; it is removed the moment the read loop ends. All
/// mutation of the map happens through `DashMap`'s own per-shard locking,
/// so no separate server-wide mutex is needed.
pub struct Server {
    listen_port: u16,
    config: Arc<CoreConfig>,
    connections: DashMap<Uuid, Arc<Peer>>,
    node: Weak<dyn Node>,
}

impl Server {
    pub fn new(listen_port: u16, config: Arc<CoreConfig>, node: Weak<dyn Node>) -> Arc<Self> {
        Arc::new(Self {
            listen_port,
            config,
            connections: DashMap::new(),
            node,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn peer(&self, uuid: &Uuid) -> Option<Arc<Peer>> {
        self.connections.get(uuid).map(|entry| Arc::clone(entry.value()))
    }

    /// Bind and accept forever. Each accepted stream gets its own
    /// handshake-and-register task; a failed handshake is logged and the
    /// stream closed without disturbing the accept loop.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))
            .await
            .map_err(|source| ServerError::Bind { port: self.listen_port, source })?;
        info!(port = self.listen_port, "gossip server listening");

        loop {
            let (stream, addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.accept_one(stream, addr).await;
            });
        }
    }

    async fn accept_one(self: Arc<Self>, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let (incoming, reader) = match IncomingConnection::accept(stream, &self.config).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%addr, error = %e, "rejecting incoming connection");
                return;
            }
        };

        let Some(node) = self.node.upgrade() else { return };
        let (peer, connection) = Peer::from_incoming(incoming, addr.ip().to_string(), self.node.clone(), Arc::clone(&self.config));

        self.connections.insert(peer.uuid, Arc::clone(&peer));
        info!(uuid = %peer.uuid, %addr, "accepted incoming peer connection");
        node.add_peer(PeerTarget::Incoming(Arc::clone(&peer))).await;

        let uuid = peer.uuid;
        Arc::clone(&peer).run_incoming(connection, reader).await;

        self.connections.remove(&uuid);
        info!(uuid = %uuid, "peer connection closed");
    }
}
