//! # Peer
//!
//! `Peer` is the state machine at the center of the gossip core: one per
//! remote node, driven forward by a periodic [`Peer::advance`] call and by
//! whatever arrives on its current [`PeerConnection`]. It owns the peer's
//! URL, its [`PeerState`], an optional live connection, clock-skew and
//! latency estimates, and a [`ThrottlingQueue`] of inbound requests so a
//! flood of `fetch`/`query` traffic from one peer can never starve the
//! node or the connection's read loop.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::connection::{ConnectionError, Direction, IncomingConnection, OutgoingConnection, PeerConnection};
use crate::gossip::{Gossip, Index};
use crate::node::{Candidate, Hash, Node, PeerTarget};
use crate::throttle::{Handler, ThrottlingQueue};

/// `scheme://<uuid>@<host>:<port>/` — a peer URL valid iff it has a host, a
/// non-zero port, and a user component that parses as the peer's node UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub uuid: Uuid,
    raw: String,
}

/// Why a candidate string failed to parse as a [`PeerUrl`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerUrlError {
    #[error("url has no host")]
    MissingHost,
    #[error("url has no port, or port is zero")]
    MissingPort,
    #[error("url's user component is not a valid uuid")]
    InvalidUuid,
    #[error("malformed url")]
    Malformed,
}

impl PeerUrl {
    pub fn parse(raw: &str) -> Result<Self, PeerUrlError> {
        let url = Url::parse(raw).map_err(|_| PeerUrlError::Malformed)?;
        let host = url.host_str().ok_or(PeerUrlError::MissingHost)?.to_string();
        let port = match url.port() {
            Some(0) | None => return Err(PeerUrlError::MissingPort),
            Some(p) => p,
        };
        let user = url.username();
        if user.is_empty() {
            return Err(PeerUrlError::InvalidUuid);
        }
        let uuid = Uuid::parse_str(user).map_err(|_| PeerUrlError::InvalidUuid)?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            uuid,
            raw: raw.to_string(),
        })
    }
}

impl FromStr for PeerUrl {
    type Err = PeerUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Lifecycle state of a [`Peer`]. [`Peer::advance`] and the connection-event
/// callbacks are the only places that write it.
#[derive(Debug, Clone)]
pub enum PeerState {
    New(Instant),
    Connecting(Instant),
    Connected,
    Querying(Instant),
    Queried,
    Passive,
    Failed(String, Instant),
    Ignored(String),
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::New(_) => write!(f, "new"),
            PeerState::Connecting(_) => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Querying(_) => write!(f, "querying"),
            PeerState::Queried => write!(f, "queried"),
            PeerState::Passive => write!(f, "passive"),
            PeerState::Failed(reason, _) => write!(f, "failed({reason})"),
            PeerState::Ignored(reason) => write!(f, "ignored({reason})"),
        }
    }
}

/// One inbound frame waiting to be handled, queued by
/// [`Peer::on_frame`] and drained by the peer's [`ThrottlingQueue`].
pub struct Request {
    pub connection: Arc<PeerConnection>,
    pub gossip: Gossip,
    pub counter: u64,
}

/// Bridges [`ThrottlingQueue`]'s `Arc<H>`-owned handler to a `Peer` that
/// must itself hold the queue — breaking the construction cycle with a
/// weak reference, the same pattern `PeerConnection` uses for its delegate.
struct PeerHandler(Weak<Peer>);

impl Handler<Request> for PeerHandler {
    fn handle<'a>(&'a self, item: Request) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        let weak = self.0.clone();
        Box::pin(async move {
            if let Some(peer) = weak.upgrade() {
                peer.handle_request(item).await;
            }
        })
    }
}

fn current_epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A remote node, and everything the gossip core tracks about our
/// relationship with it.
pub struct Peer {
    pub url: PeerUrl,
    pub uuid: Uuid,
    state: Mutex<PeerState>,
    connection: Mutex<Option<Arc<PeerConnection>>>,
    last_seen: Mutex<Option<Instant>>,
    last_index_request_latency: Mutex<Option<Duration>>,
    time_difference: Mutex<Option<i64>>,
    queue: ThrottlingQueue<Request>,
    node: Weak<dyn Node>,
    config: Arc<CoreConfig>,
    self_weak: Weak<Peer>,
    /// Set once the peer's worker loop should not be (re)started — e.g.
    /// after the owning `Server`/`Node` decides to forget this peer.
    destroyed: AtomicBool,
}

impl Peer {
    /// Build a new `Peer` for `url`, starting in `PeerState::New`.
    pub fn new(url: PeerUrl, node: Weak<dyn Node>, config: Arc<CoreConfig>) -> Arc<Self> {
        let uuid = url.uuid;
        Arc::new_cyclic(|weak_self| {
            let queue = ThrottlingQueue::new(
                config.peer_request_interval,
                config.peer_request_queue_size,
                Arc::new(PeerHandler(weak_self.clone())),
            );
            Peer {
                url,
                uuid,
                state: Mutex::new(PeerState::New(Instant::now())),
                connection: Mutex::new(None),
                last_seen: Mutex::new(None),
                last_index_request_latency: Mutex::new(None),
                time_difference: Mutex::new(None),
                queue,
                node,
                config,
                self_weak: weak_self.clone(),
                destroyed: AtomicBool::new(false),
            }
        })
    }

    /// Wrap an already-accepted [`IncomingConnection`] as a brand-new peer,
    /// for the case where the Server learns about a peer by accepting its
    /// channel rather than by URL.
    ///
    /// Returns the peer together with its connection and reader half —
    /// `Server` owns the accept loop, so it drives the read loop itself via
    /// [`Peer::run_incoming`] rather than `Peer` spawning one of its own.
    pub fn from_incoming(
        incoming: Arc<IncomingConnection>,
        host: String,
        node: Weak<dyn Node>,
        config: Arc<CoreConfig>,
    ) -> (Arc<Self>, Arc<PeerConnection>) {
        let raw = format!("gossip://{}@{}:{}/", incoming.peer_uuid, host, incoming.peer_port);
        let url = PeerUrl {
            scheme: "gossip".to_string(),
            host,
            port: incoming.peer_port,
            uuid: incoming.peer_uuid,
            raw,
        };
        let peer = Self::new(url, node, config.clone());
        let connection = PeerConnection::new(incoming, Direction::Incoming, config);
        connection.set_delegate(peer.self_weak.clone());
        *peer.connection.lock() = Some(Arc::clone(&connection));
        *peer.state.lock() = PeerState::Connected;
        (peer, connection)
    }

    pub fn connection(&self) -> Option<Arc<PeerConnection>> {
        self.connection.lock().clone()
    }

    pub fn state_label(&self) -> String {
        self.state.lock().to_string()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub fn last_seen(&self) -> Option<Instant> {
        *self.last_seen.lock()
    }

    pub fn last_index_request_latency(&self) -> Option<Duration> {
        *self.last_index_request_latency.lock()
    }

    pub fn time_difference(&self) -> Option<i64> {
        *self.time_difference.lock()
    }

    fn fail(&self, reason: String) {
        warn!(uuid = %self.uuid, reason = %reason, "peer failed");
        *self.state.lock() = PeerState::Failed(reason, Instant::now());
    }

    fn set_ignored(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(uuid = %self.uuid, reason = %reason, "peer ignored");
        *self.state.lock() = PeerState::Ignored(reason);
    }

    fn spawn_read_loop(
        self: &Arc<Self>,
        connection: Arc<PeerConnection>,
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    ) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            Self::drain_lines(&connection, reader).await;
            peer.on_disconnected();
        });
    }

    async fn drain_lines(connection: &Arc<PeerConnection>, reader: BufReader<tokio::net::tcp::OwnedReadHalf>) {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => connection.receive(line.as_str()),
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// Drive an accepted incoming connection's read loop to completion.
    /// `Server` spawns this on its own worker (distinct from its accept
    /// loop) and, once it returns, removes the connection from its map and
    /// fires the disconnected event.
    pub async fn run_incoming(self: Arc<Self>, connection: Arc<PeerConnection>, reader: BufReader<tokio::net::tcp::OwnedReadHalf>) {
        Self::drain_lines(&connection, reader).await;
        self.on_disconnected();
    }

    /// Called by `PeerConnection::receive` for every frame that isn't a
    /// reply to one of our own outstanding requests: unsolicited pushes
    /// (counter 0) and inbound requests alike. Updates `last_seen` and
    /// enqueues onto the throttling queue.
    pub async fn on_frame(self: Arc<Self>, connection: Arc<PeerConnection>, gossip: Gossip, counter: u64) {
        *self.last_seen.lock() = Some(Instant::now());
        self.queue.enqueue(Request { connection, gossip, counter });
    }

    fn on_connected(&self) {
        let mut state = self.state.lock();
        if matches!(*state, PeerState::Connecting(_)) {
            *state = PeerState::Connected;
        } else {
            debug!(uuid = %self.uuid, state = %*state, "on_connected while not connecting; ignoring");
        }
    }

    fn on_disconnected(&self) {
        *self.connection.lock() = None;
        self.fail("disconnected".to_string());
    }

    /// Permanently stop this peer's throttling-queue worker. The `Node`
    /// calls this when forgetting a peer; nothing else resurrects it.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    /// Drive the state machine forward one tick. Never propagates an
    /// error — any failure during dispatch is localized to this peer via
    /// `fail`/`set_ignored`.
    pub async fn advance(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let Some(node) = self.node.upgrade() else { return };
        let now = Instant::now();

        // `Connecting` is excluded here: a dial in flight legitimately has no
        // connection object yet (one only exists once `OutgoingConnection::connect`
        // returns), so treating that absence as a disconnect would collapse every
        // in-flight dial back to `New` on the very next tick and the
        // `PeerRetryAfterFailureInterval` deadline below would never get a chance
        // to fire.
        if !self.has_connection() {
            let mut state = self.state.lock();
            if matches!(
                *state,
                PeerState::Connected | PeerState::Queried | PeerState::Querying(_) | PeerState::Passive
            ) {
                *state = PeerState::New(now);
            }
        }

        let snapshot = { self.state.lock().clone() };
        match snapshot {
            PeerState::Failed(_, at) => {
                if now.saturating_duration_since(at) > self.config.retry_after_failure {
                    *self.connection.lock() = None;
                    *self.state.lock() = PeerState::New(at);
                }
            }
            PeerState::New(_) => {
                if self.url.port == 0 {
                    self.set_ignored("does not accept incoming");
                } else if self.config.supports_outgoing {
                    *self.state.lock() = PeerState::Connecting(now);
                    self.spawn_connect(Arc::clone(&node), now);
                } else {
                    self.set_ignored("cannot make outgoing connections");
                }
            }
            PeerState::Connected | PeerState::Queried => {
                self.query(&node).await;
            }
            PeerState::Passive | PeerState::Ignored(_) => {}
            PeerState::Connecting(since) | PeerState::Querying(since) => {
                if now.saturating_duration_since(since) > self.config.retry_after_failure {
                    *self.connection.lock() = None;
                    *self.state.lock() = PeerState::New(since);
                }
            }
        }
    }

    /// Dial `self.url` on a spawned task so a slow or hanging TCP connect
    /// never blocks the `advance()` tick for this peer or any other —
    /// the same "transport send blocks, bounded by the transport" concern
    /// applies equally to connect. `since` is the generation
    /// stamp written into `PeerState::Connecting` right before this was
    /// called; if the retry deadline (or a `destroy`) has already moved
    /// the peer to a different generation by the time the dial resolves,
    /// the result is discarded rather than clobbering a newer state.
    fn spawn_connect(self: &Arc<Self>, node: Arc<dyn Node>, since: Instant) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let result = OutgoingConnection::connect(&peer.url.host, peer.url.port, node.uuid(), node.port(), &peer.config).await;

            let still_this_attempt = matches!(*peer.state.lock(), PeerState::Connecting(s) if s == since);
            if !still_this_attempt {
                debug!(uuid = %peer.uuid, "discarding stale connect attempt result");
                return;
            }

            match result {
                Ok((transport, reader)) => {
                    let connection = PeerConnection::new(transport, Direction::Outgoing, Arc::clone(&peer.config));
                    connection.set_delegate(peer.self_weak.clone());
                    *peer.connection.lock() = Some(Arc::clone(&connection));
                    peer.spawn_read_loop(connection, reader);
                    peer.on_connected();
                }
                Err(ConnectionError::OutgoingDisabled) => {
                    peer.set_ignored("cannot make outgoing connections");
                }
                Err(e) => {
                    peer.fail(format!("connect failed: {e}"));
                }
            }
        });
    }

    /// Send a `query`, install a continuation that processes the reply
    /// once it arrives. The continuation never blocks the
    /// state-machine driver: it is a spawned task, not inline `advance`
    /// work, since a reply can legitimately take longer than one poll
    /// interval to arrive.
    async fn query(self: &Arc<Self>, node: &Arc<dyn Node>) {
        let connection = match self.connection.lock().clone() {
            Some(c) => c,
            None => {
                self.fail("no connection to query".to_string());
                return;
            }
        };
        let now = Instant::now();
        *self.state.lock() = PeerState::Querying(now);
        match connection.request(Gossip::Query).await {
            Ok((_, rx)) => {
                let peer = Arc::clone(self);
                let node = Arc::clone(node);
                tokio::spawn(async move {
                    if let Ok(reply) = rx.await {
                        peer.handle_query_reply(reply, node, now).await;
                    }
                });
            }
            Err(e) => self.fail(format!("query failed: {e}")),
        }
    }

    async fn handle_query_reply(self: Arc<Self>, reply: Gossip, node: Arc<dyn Node>, t_req: Instant) {
        let now = Instant::now();
        *self.last_seen.lock() = Some(now);
        *self.last_index_request_latency.lock() = Some(now.saturating_duration_since(t_req) / 2);

        match reply {
            Gossip::Index(idx) => {
                if idx.genesis != node.ledger().genesis_hash() {
                    *self.connection.lock() = None;
                    self.set_ignored("believes in other genesis");
                    return;
                }
                *self.state.lock() = PeerState::Queried;
                let peer_time = idx.timestamp as i64;
                *self.time_difference.lock() = Some(peer_time - current_epoch_seconds() as i64);

                for url in &idx.peers {
                    if let Ok(peer_url) = PeerUrl::parse(url) {
                        node.add_peer(PeerTarget::Url(peer_url)).await;
                    }
                }
                node.receive_best(Candidate {
                    hash: idx.highest.clone(),
                    height: idx.height,
                    peer: self.uuid,
                })
                .await;
            }
            Gossip::Passive => {
                *self.state.lock() = PeerState::Passive;
            }
            _ => {
                self.fail("Invalid reply to query".to_string());
            }
        }
    }

    /// Handle one inbound request, drained by the throttling queue. Runs
    /// with no concurrent sibling call for this peer.
    async fn handle_request(self: Arc<Self>, req: Request) {
        let Some(node) = self.node.upgrade() else { return };
        match req.gossip {
            Gossip::Forget => {
                node.forget(self.uuid).await;
                self.set_ignored("peer requested to be forgotten");
            }
            Gossip::Transaction(payload) => {
                if let Err(e) = node.receive_transaction(payload, self.uuid).await {
                    self.fail(format!("invalid transaction: {e}"));
                }
            }
            Gossip::Block(payload) => {
                if node.receive_block(payload, self.uuid, false).await.is_err() {
                    self.fail("Received invalid unsolicited block".to_string());
                }
            }
            Gossip::Fetch { hash, extra } => {
                if extra > self.config.max_extra_blocks {
                    self.fail("limit exceeded".to_string());
                    return;
                }
                self.handle_fetch(&req.connection, req.counter, &node, hash, extra).await;
            }
            Gossip::Query => {
                self.handle_query_request(&req.connection, req.counter, &node).await;
            }
            Gossip::Index(_) | Gossip::Passive | Gossip::Result { .. } | Gossip::Error(_) => {
                self.set_ignored("peer sent invalid request");
            }
        }
    }

    async fn handle_fetch(
        &self,
        connection: &Arc<PeerConnection>,
        counter: u64,
        node: &Arc<dyn Node>,
        hash: Hash,
        extra: u32,
    ) {
        let ledger = node.ledger();
        let Some(block) = ledger.get_block(&hash) else {
            let _ = connection.reply(counter, Gossip::Error("not found".to_string())).await;
            return;
        };

        let mut extras = HashMap::new();
        let genesis = ledger.genesis_hash();
        let mut cursor = block.previous_hash();
        for _ in 0..extra {
            let Some(prev_hash) = cursor else { break };
            let Some(prev_block) = ledger.get_block(&prev_hash) else { break };
            let next_cursor = prev_block.previous_hash();
            let reached_genesis = prev_hash == genesis;
            extras.insert(prev_hash.0.clone(), prev_block);
            if reached_genesis {
                break;
            }
            cursor = next_cursor;
        }

        let _ = connection.reply(counter, Gossip::Result { block, extra: extras }).await;
    }

    async fn handle_query_request(&self, connection: &Arc<PeerConnection>, counter: u64, node: &Arc<dyn Node>) {
        let ledger = node.ledger();
        let index = Index {
            genesis: ledger.genesis_hash(),
            highest: ledger.highest_hash(),
            height: ledger.height(),
            timestamp: current_epoch_seconds(),
            peers: node.valid_peers().iter().map(|u| u.to_string()).collect(),
        };
        let _ = connection.reply(counter, Gossip::Index(index)).await;
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("uuid", &self.uuid)
            .field("url", &self.url.raw)
            .field("state", &self.state_label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Transport;
    use crate::node::{Candidate, Ledger, LedgerError, OpaquePayload, PeerTarget};
    use std::sync::atomic::AtomicUsize;

    struct DummyLedger {
        genesis: Hash,
    }

    impl Ledger for DummyLedger {
        fn genesis_hash(&self) -> Hash {
            self.genesis.clone()
        }
        fn highest_hash(&self) -> Hash {
            self.genesis.clone()
        }
        fn height(&self) -> u64 {
            0
        }
        fn get_block(&self, _hash: &Hash) -> Option<OpaquePayload> {
            None
        }
        fn ingest_block(&self, _block: OpaquePayload, _was_requested: bool) -> Result<(), LedgerError> {
            Ok(())
        }
        fn ingest_transaction(&self, _tx: OpaquePayload) -> Result<(), LedgerError> {
            Ok(())
        }
    }

    struct DummyNode {
        genesis: Hash,
        receive_best_calls: AtomicUsize,
    }

    impl DummyNode {
        fn new(genesis: &str) -> Arc<Self> {
            Arc::new(Self {
                genesis: Hash::new(genesis),
                receive_best_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Node for DummyNode {
        fn uuid(&self) -> Uuid {
            Uuid::nil()
        }
        fn port(&self) -> u16 {
            9000
        }
        async fn add_peer(&self, _target: PeerTarget) {}
        async fn forget(&self, _peer_uuid: Uuid) {}
        async fn receive_best(&self, _candidate: Candidate) {
            self.receive_best_calls.fetch_add(1, Ordering::SeqCst);
        }
        async fn receive_transaction(&self, _tx: OpaquePayload, _from: Uuid) -> Result<(), LedgerError> {
            Ok(())
        }
        async fn receive_block(&self, _block: OpaquePayload, _from: Uuid, _was_requested: bool) -> Result<(), LedgerError> {
            Ok(())
        }
        fn valid_peers(&self) -> Vec<PeerUrl> {
            Vec::new()
        }
        fn ledger(&self) -> Arc<dyn Ledger> {
            Arc::new(DummyLedger { genesis: self.genesis.clone() })
        }
        fn median_network_time(&self) -> u64 {
            0
        }
    }

    struct StubTransport {
        connected: std::sync::atomic::AtomicBool,
    }

    impl StubTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self { connected: std::sync::atomic::AtomicBool::new(true) })
        }
    }

    #[async_trait::async_trait]
    impl Transport for StubTransport {
        async fn send_line(&self, _line: &str) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn test_peer(node: &Arc<DummyNode>, config: Arc<CoreConfig>) -> Arc<Peer> {
        let url = PeerUrl::parse(&format!("gossip://{}@example.com:9000/", Uuid::new_v4())).unwrap();
        let weak: Weak<dyn Node> = Arc::downgrade(node) as Weak<dyn Node>;
        Peer::new(url, weak, config)
    }

    #[tokio::test]
    async fn connecting_state_persists_until_retry_deadline_passes() {
        let node = DummyNode::new("G");
        let mut config = CoreConfig::default();
        config.retry_after_failure = Duration::from_millis(20);
        let config = Arc::new(config);
        let peer = test_peer(&node, config.clone());

        let since = Instant::now();
        *peer.state.lock() = PeerState::Connecting(since);

        // Before the deadline: a dial in flight must not be reset just
        // because there is no connection object yet.
        peer.advance().await;
        assert!(matches!(*peer.state.lock(), PeerState::Connecting(s) if s == since));

        // After the deadline: advance() resets it to `new`, preserving the
        // original `since` so the total attempt time stays bounded.
        tokio::time::sleep(config.retry_after_failure + Duration::from_millis(10)).await;
        peer.advance().await;
        assert!(matches!(*peer.state.lock(), PeerState::New(s) if s == since));
    }

    #[tokio::test]
    async fn failed_state_waits_for_cooldown_before_resetting() {
        let node = DummyNode::new("G");
        let mut config = CoreConfig::default();
        config.retry_after_failure = Duration::from_millis(30);
        let config = Arc::new(config);
        let peer = test_peer(&node, config.clone());

        let at = Instant::now();
        *peer.state.lock() = PeerState::Failed("disconnected".to_string(), at);

        peer.advance().await;
        assert!(matches!(*peer.state.lock(), PeerState::Failed(_, _)), "must not reset before cooldown elapses");

        tokio::time::sleep(config.retry_after_failure + Duration::from_millis(10)).await;
        peer.advance().await;
        assert!(matches!(*peer.state.lock(), PeerState::New(_)));
    }

    #[tokio::test]
    async fn new_peer_with_zero_port_is_ignored() {
        let node = DummyNode::new("G");
        let config = Arc::new(CoreConfig::default());
        let url = PeerUrl {
            scheme: "gossip".to_string(),
            host: "example.com".to_string(),
            port: 0,
            uuid: Uuid::new_v4(),
            raw: "gossip://x@example.com:0/".to_string(),
        };
        let weak: Weak<dyn Node> = Arc::downgrade(&node) as Weak<dyn Node>;
        let peer = Peer::new(url, weak, config);

        peer.advance().await;
        assert_eq!(peer.state_label(), "ignored(does not accept incoming)");
    }

    #[tokio::test]
    async fn query_reply_with_wrong_genesis_is_ignored_and_skips_receive_best() {
        let node = DummyNode::new("G");
        let config = Arc::new(CoreConfig::default());
        let peer = test_peer(&node, config.clone());

        let connection = PeerConnection::new(StubTransport::new(), Direction::Outgoing, config);
        *peer.connection.lock() = Some(Arc::clone(&connection));

        let wrong_index = Gossip::Index(Index {
            genesis: Hash::new("other-genesis"),
            highest: Hash::new("H"),
            height: 7,
            timestamp: 1_700_000_000,
            peers: vec![],
        });
        Arc::clone(&peer).handle_query_reply(wrong_index, node.clone() as Arc<dyn Node>, Instant::now()).await;

        assert_eq!(peer.state_label(), "ignored(believes in other genesis)");
        assert!(!peer.has_connection());
        assert_eq!(node.receive_best_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn valid_peer_url_parses_host_port_and_uuid() {
        let uuid = Uuid::new_v4();
        let raw = format!("gossip://{uuid}@example.com:9000/");
        let parsed = PeerUrl::parse(&raw).unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.uuid, uuid);
    }

    #[test]
    fn url_without_port_is_rejected() {
        let uuid = Uuid::new_v4();
        let raw = format!("gossip://{uuid}@example.com/");
        assert_eq!(PeerUrl::parse(&raw).unwrap_err(), PeerUrlError::MissingPort);
    }

    #[test]
    fn url_with_non_uuid_user_is_rejected() {
        let raw = "gossip://not-a-uuid@example.com:9000/";
        assert_eq!(PeerUrl::parse(raw).unwrap_err(), PeerUrlError::InvalidUuid);
    }

    #[test]
    fn url_without_user_component_is_rejected() {
        let raw = "gossip://example.com:9000/";
        assert_eq!(PeerUrl::parse(raw).unwrap_err(), PeerUrlError::InvalidUuid);
    }
}
