//! # Core Configuration
//!
//! Tunable parameters consumed by the gossip and peer-management core.
//! None of these have a "right" value in the abstract — they depend on the
//! embedder's network size, trust model, and hardware. `CoreConfig` collects
//! them in one place so a binary wiring this crate together has a single
//! struct to expose via CLI flags or a config file.

use std::time::Duration;

/// Name of the variant-tag field inside a gossip object, e.g. `"t"`.
pub const DEFAULT_ACTION_KEY: &str = "t";

/// Handshake tag every connection must present at establishment.
pub const PROTOCOL_VERSION: u32 = 1;

/// Query-parameter name carrying the local node's UUID on an outgoing
/// connection request.
pub const DEFAULT_UUID_REQUEST_KEY: &str = "uuid";

/// Query-parameter name carrying the local node's listen port on an
/// outgoing connection request.
pub const DEFAULT_PORT_REQUEST_KEY: &str = "port";

/// Upper bound on `fetch.extra` and `result.extra` size.
pub const DEFAULT_MAX_EXTRA_BLOCKS: u32 = 32;

/// Minimum interval between successive inbound-request handler invocations
/// for a single peer.
pub const DEFAULT_PEER_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

/// Bound on a peer's inbound request queue before shedding begins.
pub const DEFAULT_PEER_REQUEST_QUEUE_SIZE: usize = 64;

/// Deadline for `connecting`/`querying` states and cooldown for `failed`.
pub const DEFAULT_RETRY_AFTER_FAILURE: Duration = Duration::from_secs(30);

/// Poll cadence for `Peer::advance`.
pub const DEFAULT_ADVANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration surface consumed by the core.
///
/// Mirrors the parameter table an embedder is expected to supply. Defaults
/// are reasonable for a small, trusted test network; production deployments
/// should tune `max_extra_blocks` and the peer request limits to their own
/// threat model.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub action_key: String,
    pub protocol_version: u32,
    pub uuid_request_key: String,
    pub port_request_key: String,
    pub max_extra_blocks: u32,
    pub peer_request_interval: Duration,
    pub peer_request_queue_size: usize,
    pub retry_after_failure: Duration,
    pub advance_interval: Duration,
    /// Whether this platform can initiate outgoing connections at all.
    /// Platforms without outgoing support must set this to `false`; peers
    /// for URLs on such a platform are transitioned to
    /// `ignored("cannot make outgoing connections")`.
    pub supports_outgoing: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            action_key: DEFAULT_ACTION_KEY.to_string(),
            protocol_version: PROTOCOL_VERSION,
            uuid_request_key: DEFAULT_UUID_REQUEST_KEY.to_string(),
            port_request_key: DEFAULT_PORT_REQUEST_KEY.to_string(),
            max_extra_blocks: DEFAULT_MAX_EXTRA_BLOCKS,
            peer_request_interval: DEFAULT_PEER_REQUEST_INTERVAL,
            peer_request_queue_size: DEFAULT_PEER_REQUEST_QUEUE_SIZE,
            retry_after_failure: DEFAULT_RETRY_AFTER_FAILURE,
            advance_interval: DEFAULT_ADVANCE_INTERVAL,
            supports_outgoing: true,
        }
    }
}
