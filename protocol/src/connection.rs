//! # PeerConnection & Transports
//!
//! A [`PeerConnection`] frames a bidirectional message channel into the
//! gossip wire protocol: outbound `[counter, object]` requests with
//! correlation counters, reply dispatch back to the caller that made the
//! request, and delivery of unsolicited/inbound frames to a delegate
//! ([`crate::peer::Peer`]).
//!
//! Two transports share the same contract — [`IncomingConnection`], built
//! from a channel the [`crate::server::Server`] just accepted, and
//! [`OutgoingConnection`], dialed from a URL. Both are newline-delimited
//! JSON over a `TcpStream`; the split exists so each side can validate the
//! protocol-version handshake and embed the right query parameters without
//! the other knowing about it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::gossip::{parse_frame, tolerant_u64, Gossip, GossipError};
use crate::peer::Peer;

/// Which end of a connection we are. Fixes the parity of the counters this
/// side hands out, which is what keeps correlation IDs from colliding with
/// the other side's own outbound requests (see module docs on
/// [`PeerConnection`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We accepted this channel; our counters start at 1 (odd).
    Incoming,
    /// We dialed this channel; our counters start at 0 (even).
    Outgoing,
}

impl Direction {
    fn initial_counter(self) -> u64 {
        match self {
            Direction::Incoming => 1,
            Direction::Outgoing => 0,
        }
    }
}

/// Errors raised by [`PeerConnection`] and the transport handshake.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection is not connected")]
    NotConnected,
    #[error("transport handshake is missing a protocol version tag")]
    ProtocolVersionMissing,
    #[error("transport handshake protocol version {found} does not match required {required}")]
    ProtocolVersionUnsupported { found: u32, required: u32 },
    #[error("outgoing connections are disabled on this platform (port <= 0)")]
    OutgoingDisabled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid peer url: {0}")]
    InvalidUrl(String),
}

/// The handshake line exchanged before gossip frames start flowing: a JSON
/// object carrying the fixed `protocol_version` tag plus the local uuid and
/// listen port under whatever field names `config.uuid_request_key` /
/// `config.port_request_key` name. Sent once by the dialing (outgoing)
/// side, checked once by the accepting (incoming) side.
fn encode_handshake(config: &CoreConfig, uuid: Uuid, port: u16) -> String {
    let mut map = serde_json::Map::new();
    map.insert("protocol_version".to_string(), serde_json::Value::from(config.protocol_version));
    map.insert(config.uuid_request_key.clone(), serde_json::Value::String(uuid.to_string()));
    map.insert(config.port_request_key.clone(), serde_json::Value::from(port));
    serde_json::Value::Object(map).to_string()
}

struct Handshake {
    protocol_version: u32,
    uuid: Uuid,
    port: u16,
}

fn decode_handshake(config: &CoreConfig, line: &str) -> Option<Handshake> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let map = value.as_object()?;
    let protocol_version = tolerant_u64(map.get("protocol_version")?)? as u32;
    let uuid = map.get(&config.uuid_request_key)?.as_str()?.parse().ok()?;
    let port = tolerant_u64(map.get(&config.port_request_key)?)? as u16;
    Some(Handshake { protocol_version, uuid, port })
}

/// The send half of a framed channel. `IncomingConnection` and
/// `OutgoingConnection` each implement this over their own `TcpStream`
/// half; `PeerConnection` only ever talks to the trait object.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_line(&self, line: &str) -> Result<(), ConnectionError>;
    fn is_connected(&self) -> bool;
}

/// A single peer's framed connection: owns the transport, the outbound
/// counter, and the table of pending reply callbacks.
///
/// `counter`'s parity is the direction bit (see [`Direction`]); every call
/// to [`PeerConnection::request`] bumps it by two under the same atomic, so
/// concurrent callers never hand out the same counter twice. The pending
/// table is a [`DashMap`] rather than a single mutex around a `HashMap` —
/// registering a callback and draining a reply never need to block each
/// other's shard.
pub struct PeerConnection {
    transport: Arc<dyn Transport>,
    counter: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Gossip>>,
    delegate: Mutex<Weak<Peer>>,
    config: Arc<CoreConfig>,
}

// `delegate` is set once, right after construction, by whoever owns both
// ends of the cycle (Peer owns the Arc<PeerConnection>, the connection only
// holds a Weak<Peer> back); it is read on every receive but written at most
// once.

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("counter", &self.counter.load(Ordering::SeqCst))
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl PeerConnection {
    pub fn new(transport: Arc<dyn Transport>, direction: Direction, config: Arc<CoreConfig>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            counter: AtomicU64::new(direction.initial_counter()),
            pending: DashMap::new(),
            delegate: Mutex::new(Weak::new()),
            config,
        })
    }

    /// Install the `Peer` this connection delivers unsolicited frames to.
    /// Called once, right after the `Peer` wraps this connection in an
    /// `Arc`, closing the otherwise-unbreakable `Peer <-> PeerConnection`
    /// cycle with a weak back-edge.
    pub fn set_delegate(&self, peer: Weak<Peer>) {
        *self.delegate.lock() = peer;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn next_counter(&self) -> u64 {
        self.counter.fetch_add(2, Ordering::SeqCst)
    }

    /// Send a new request, returning the assigned counter and a receiver
    /// that resolves when the matching reply arrives. Dropping the receiver
    /// is fine — the pending entry is simply never collected. There is no
    /// per-request timeout; a reply that never comes just leaks one entry
    /// until the connection itself closes.
    pub async fn request(&self, gossip: Gossip) -> Result<(u64, oneshot::Receiver<Gossip>), ConnectionError> {
        if !self.transport.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let counter = self.next_counter();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(counter, tx);
        let line = gossip.to_frame(counter, &self.config.action_key);
        if let Err(e) = self.transport.send_line(&line).await {
            self.pending.remove(&counter);
            return Err(e);
        }
        Ok((counter, rx))
    }

    /// Reply to an inbound request, echoing its counter.
    pub async fn reply(&self, counter: u64, gossip: Gossip) -> Result<(), ConnectionError> {
        if !self.transport.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let line = gossip.to_frame(counter, &self.config.action_key);
        self.transport.send_line(&line).await
    }

    /// Decode one wire line and dispatch it: a reply to a pending request
    /// resolves that request's receiver, anything else (including counter
    /// 0 pushes) goes to the delegate `Peer`. Both paths run on a spawned
    /// task so the transport's read loop never blocks on handler work.
    pub fn receive(self: &Arc<Self>, line: &str) {
        let (counter, gossip) = match parse_frame(line, &self.config.action_key, self.config.max_extra_blocks) {
            Ok(pair) => pair,
            Err(e) => {
                match e {
                    GossipError::LimitExceeded => warn!(error = %e, "dropping frame over the extra-block limit"),
                    _ => trace!(error = %e, "dropping malformed gossip frame"),
                }
                return;
            }
        };

        if counter != 0 {
            if let Some((_, tx)) = self.pending.remove(&counter) {
                tokio::spawn(async move {
                    let _ = tx.send(gossip);
                });
                return;
            }
        }

        let delegate = self.delegate.lock().upgrade();
        let Some(peer) = delegate else {
            debug!(counter, "dropping frame: connection has no live delegate");
            return;
        };
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            peer.on_frame(connection, gossip, counter).await;
        });
    }
}

/// A channel the [`crate::server::Server`] accepted. Validates the
/// handshake's protocol-version tag before the connection is usable;
/// construction fails with [`ConnectionError::ProtocolVersionMissing`] or
/// [`ConnectionError::ProtocolVersionUnsupported`] otherwise.
pub struct IncomingConnection {
    writer: AsyncMutex<tokio::net::tcp::OwnedWriteHalf>,
    connected: std::sync::atomic::AtomicBool,
    /// uuid/port the remote told us about in its handshake, so the embedder
    /// can build its own symmetric `Peer` entry for it.
    pub peer_uuid: Uuid,
    pub peer_port: u16,
}

impl IncomingConnection {
    /// Perform the inbound handshake over an already-accepted stream,
    /// returning both the validated connection and a `BufReader` the
    /// caller drives in its own read loop (kept split from `send_line` so
    /// reads and writes never contend on the same lock).
    pub async fn accept(
        stream: TcpStream,
        config: &CoreConfig,
    ) -> Result<(Arc<Self>, BufReader<tokio::net::tcp::OwnedReadHalf>), ConnectionError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line.trim().is_empty() {
            return Err(ConnectionError::ProtocolVersionMissing);
        }
        let handshake = decode_handshake(config, line.trim())
            .ok_or(ConnectionError::ProtocolVersionMissing)?;
        if handshake.protocol_version != config.protocol_version {
            return Err(ConnectionError::ProtocolVersionUnsupported {
                found: handshake.protocol_version,
                required: config.protocol_version,
            });
        }
        let conn = Arc::new(Self {
            writer: AsyncMutex::new(write_half),
            connected: std::sync::atomic::AtomicBool::new(true),
            peer_uuid: handshake.uuid,
            peer_port: handshake.port,
        });
        Ok((conn, reader))
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for IncomingConnection {
    async fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        let mut framed = line.to_string();
        framed.push('\n');
        if let Err(e) = writer.write_all(framed.as_bytes()).await {
            self.mark_disconnected();
            return Err(e.into());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A channel we dialed from a [`crate::peer::PeerUrl`]. The handshake line
/// we send embeds our own uuid and listen port so the remote can build a
/// symmetric `Peer` entry pointing back at us.
pub struct OutgoingConnection {
    writer: AsyncMutex<tokio::net::tcp::OwnedWriteHalf>,
    connected: std::sync::atomic::AtomicBool,
}

impl OutgoingConnection {
    /// Dial `host:port`, send the handshake, and hand back both the
    /// connection and a reader for the caller's own read loop. Fails with
    /// [`ConnectionError::OutgoingDisabled`] if `local_port == 0` — a
    /// pure-passive node has nothing to invite the remote to connect back
    /// to.
    pub async fn connect(
        host: &str,
        port: u16,
        local_uuid: Uuid,
        local_port: u16,
        config: &CoreConfig,
    ) -> Result<(Arc<Self>, BufReader<tokio::net::tcp::OwnedReadHalf>), ConnectionError> {
        if local_port == 0 {
            return Err(ConnectionError::OutgoingDisabled);
        }
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Self {
            writer: AsyncMutex::new(write_half),
            connected: std::sync::atomic::AtomicBool::new(true),
        });
        let line = encode_handshake(config, local_uuid, local_port);
        conn.send_line(&line).await?;
        Ok((conn, BufReader::new(read_half)))
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for OutgoingConnection {
    async fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        let mut framed = line.to_string();
        framed.push('\n');
        if let Err(e) = writer.write_all(framed.as_bytes()).await {
            self.mark_disconnected();
            return Err(e.into());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct StubTransport {
        connected: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl StubTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for StubTransport {
        async fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ConnectionError::NotConnected);
            }
            self.sent.lock().push(line.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn counters_are_monotonic_and_parity_matches_direction() {
        let transport = StubTransport::new();
        let conn = PeerConnection::new(transport, Direction::Outgoing, Arc::new(CoreConfig::default()));
        let (c1, _rx1) = conn.request(Gossip::Query).await.unwrap();
        let (c2, _rx2) = conn.request(Gossip::Query).await.unwrap();
        assert_eq!(c1, 0);
        assert_eq!(c2, 2);

        let transport = StubTransport::new();
        let conn = PeerConnection::new(transport, Direction::Incoming, Arc::new(CoreConfig::default()));
        let (c1, _rx1) = conn.request(Gossip::Query).await.unwrap();
        assert_eq!(c1, 1);
    }

    #[tokio::test]
    async fn request_fails_when_not_connected() {
        let transport = StubTransport::new();
        transport.connected.store(false, Ordering::SeqCst);
        let conn = PeerConnection::new(transport, Direction::Outgoing, Arc::new(CoreConfig::default()));
        let err = conn.request(Gossip::Query).await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn reply_is_delivered_to_matching_callback_exactly_once() {
        let transport = StubTransport::new();
        let conn = PeerConnection::new(transport, Direction::Outgoing, Arc::new(CoreConfig::default()));
        let (counter, rx) = conn.request(Gossip::Query).await.unwrap();
        assert!(conn.pending.contains_key(&counter));

        let frame = Gossip::Passive.to_frame(counter, &conn.config.action_key);
        conn.receive(&frame);

        let reply = tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, Gossip::Passive);
        assert!(!conn.pending.contains_key(&counter));
    }

    #[test]
    fn handshake_decode_tolerates_whole_valued_float_encodings() {
        let config = CoreConfig::default();
        let line = format!(
            r#"{{"protocol_version": {}.0, "{}": "{}", "{}": 9000.0}}"#,
            config.protocol_version,
            config.uuid_request_key,
            Uuid::new_v4(),
            config.port_request_key,
        );
        let handshake = decode_handshake(&config, &line).expect("handshake decodes");
        assert_eq!(handshake.protocol_version, config.protocol_version);
        assert_eq!(handshake.port, 9000);
    }
}
