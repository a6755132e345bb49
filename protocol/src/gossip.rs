//! # Gossip Wire Format
//!
//! Every frame exchanged between peers is the ordered pair `[counter,
//! object]`, where `object` is a self-describing JSON map carrying a
//! variant-tag field (the *action key*, configurable, default `"t"`) plus
//! variant-specific fields. This module owns the [`Gossip`] enum and its
//! (de)serialization to and from that wire shape — nothing here knows about
//! transports, counters as correlation IDs, or peer state; see
//! [`crate::connection`] and [`crate::peer`] for those.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::{Hash, OpaquePayload};

/// A peer's snapshot of its chain: genesis, current head, height, its own
/// clock, and the peer URLs it knows about. Two `Index` values are equal
/// iff every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub genesis: Hash,
    pub highest: Hash,
    #[serde(deserialize_with = "deserialize_tolerant_u64")]
    pub height: u64,
    /// Seconds since the Unix epoch, as observed by the peer that built
    /// this index. Wire field name is `time`, matching the action table.
    #[serde(rename = "time", deserialize_with = "deserialize_tolerant_u64")]
    pub timestamp: u64,
    pub peers: Vec<String>,
}

/// One frame's payload, tagged by the action key. Block and transaction
/// payloads are opaque here — this layer only needs to parse and re-emit
/// them, not validate them.
#[derive(Debug, Clone, PartialEq)]
pub enum Gossip {
    Query,
    Index(Index),
    Passive,
    Block(OpaquePayload),
    Transaction(OpaquePayload),
    Fetch { hash: Hash, extra: u32 },
    Result {
        block: OpaquePayload,
        extra: HashMap<String, OpaquePayload>,
    },
    Error(String),
    Forget,
}

impl Gossip {
    fn action(&self) -> &'static str {
        match self {
            Gossip::Query => "query",
            Gossip::Index(_) => "index",
            Gossip::Passive => "passive",
            Gossip::Block(_) => "block",
            Gossip::Transaction(_) => "tx",
            Gossip::Fetch { .. } => "fetch",
            Gossip::Result { .. } => "result",
            Gossip::Error(_) => "error",
            Gossip::Forget => "forget",
        }
    }

    /// Encode this gossip as the object half of the `[counter, object]`
    /// wire pair, using `action_key` as the variant-tag field name.
    pub fn to_object(&self, action_key: &str) -> Value {
        let mut map = Map::new();
        map.insert(action_key.to_string(), Value::String(self.action().to_string()));
        match self {
            Gossip::Query | Gossip::Passive | Gossip::Forget => {}
            Gossip::Index(idx) => {
                map.insert("index".to_string(), serde_json::to_value(idx).expect("Index serializes"));
            }
            Gossip::Block(payload) => {
                map.insert("block".to_string(), payload.0.clone());
            }
            Gossip::Transaction(payload) => {
                map.insert("tx".to_string(), payload.0.clone());
            }
            Gossip::Fetch { hash, extra } => {
                map.insert("hash".to_string(), Value::String(hash.0.clone()));
                map.insert("extra".to_string(), Value::from(*extra));
            }
            Gossip::Result { block, extra } => {
                map.insert("block".to_string(), block.0.clone());
                let extra_obj: Map<String, Value> = extra
                    .iter()
                    .map(|(h, payload)| (h.clone(), payload.0.clone()))
                    .collect();
                map.insert("extra".to_string(), Value::Object(extra_obj));
            }
            Gossip::Error(message) => {
                map.insert("message".to_string(), Value::String(message.clone()));
            }
        }
        Value::Object(map)
    }

    /// Serialize the full `[counter, object]` frame as a single line of
    /// text, ready to be written to a newline-delimited transport.
    pub fn to_frame(&self, counter: u64, action_key: &str) -> String {
        let pair = Value::Array(vec![Value::from(counter), self.to_object(action_key)]);
        pair.to_string()
    }
}

/// Errors raised while parsing a gossip frame or object.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GossipError {
    #[error("frame is not a valid [counter, object] pair")]
    MalformedFrame,
    #[error("action key is missing from the gossip object")]
    MissingActionKey,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("result.extra exceeds the configured limit")]
    LimitExceeded,
}

/// Read a numeric wire field tolerantly: accepts a plain JSON integer as
/// well as a whole-valued float (e.g. `42.0`). spec.md §4.1: "Numeric fields
/// accept either integer or arbitrary-precision numeric encodings ... the
/// on-wire representation is not normalized across platforms." Used for
/// every numeric wire field a peer might encode either way — the frame
/// counter, `Index.height`/`Index.timestamp`, `fetch.extra`, and the
/// handshake's `protocol_version`/port.
pub(crate) fn tolerant_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn deserialize_tolerant_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    tolerant_u64(&value).ok_or_else(|| serde::de::Error::custom("expected an integer-valued number"))
}

/// Parse a full wire frame (`[counter, object]`) into a counter and a
/// [`Gossip`] value, enforcing `max_extra_blocks` on `result` payloads.
pub fn parse_frame(
    line: &str,
    action_key: &str,
    max_extra_blocks: u32,
) -> Result<(u64, Gossip), GossipError> {
    let value: Value =
        serde_json::from_str(line).map_err(|_| GossipError::MalformedFrame)?;
    let arr = value.as_array().ok_or(GossipError::MalformedFrame)?;
    if arr.len() != 2 {
        return Err(GossipError::MalformedFrame);
    }
    let counter = tolerant_u64(&arr[0]).ok_or(GossipError::MalformedFrame)?;
    let gossip = parse_object(&arr[1], action_key, max_extra_blocks)?;
    Ok((counter, gossip))
}

/// Parse just the object half of a frame, as used by tests and by callers
/// who already split the counter out.
pub fn parse_object(
    object: &Value,
    action_key: &str,
    max_extra_blocks: u32,
) -> Result<Gossip, GossipError> {
    let map = object.as_object().ok_or(GossipError::MalformedFrame)?;
    let action = map
        .get(action_key)
        .and_then(Value::as_str)
        .ok_or(GossipError::MissingActionKey)?;

    match action {
        "query" => Ok(Gossip::Query),
        "passive" => Ok(Gossip::Passive),
        "forget" => Ok(Gossip::Forget),
        "index" => {
            let idx_value = map.get("index").ok_or_else(|| {
                GossipError::DeserializationFailed("missing index field".to_string())
            })?;
            let idx: Index = serde_json::from_value(idx_value.clone())
                .map_err(|e| GossipError::DeserializationFailed(e.to_string()))?;
            Ok(Gossip::Index(idx))
        }
        "block" => {
            let block = map.get("block").ok_or_else(|| {
                GossipError::DeserializationFailed("missing block field".to_string())
            })?;
            Ok(Gossip::Block(OpaquePayload(block.clone())))
        }
        "tx" => {
            let tx = map
                .get("tx")
                .ok_or_else(|| GossipError::DeserializationFailed("missing tx field".to_string()))?;
            Ok(Gossip::Transaction(OpaquePayload(tx.clone())))
        }
        "fetch" => {
            let hash = map
                .get("hash")
                .and_then(Value::as_str)
                .ok_or_else(|| GossipError::DeserializationFailed("missing hash field".to_string()))?;
            let extra = map
                .get("extra")
                .and_then(tolerant_u64)
                .unwrap_or(0) as u32;
            // Unlike `result.extra` below, `fetch.extra` is not bounded at
            // parse time: the peer-level handler fails the peer on an
            // over-limit fetch, rather than the gossip layer silently
            // dropping the frame.
            Ok(Gossip::Fetch {
                hash: Hash::new(hash),
                extra,
            })
        }
        "result" => {
            let block = map.get("block").ok_or_else(|| {
                GossipError::DeserializationFailed("missing block field".to_string())
            })?;
            let extra_map = map
                .get("extra")
                .and_then(Value::as_object)
                .ok_or_else(|| GossipError::DeserializationFailed("missing extra field".to_string()))?;
            if extra_map.len() > max_extra_blocks as usize {
                return Err(GossipError::LimitExceeded);
            }
            let extra = extra_map
                .iter()
                .map(|(h, v)| (h.clone(), OpaquePayload(v.clone())))
                .collect();
            Ok(Gossip::Result {
                block: OpaquePayload(block.clone()),
                extra,
            })
        }
        "error" => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| GossipError::DeserializationFailed("missing message field".to_string()))?;
            Ok(Gossip::Error(message.to_string()))
        }
        other => Err(GossipError::UnknownAction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTION_KEY: &str = "t";

    fn round_trip(g: Gossip) {
        let frame = g.to_frame(4, ACTION_KEY);
        let (counter, parsed) = parse_frame(&frame, ACTION_KEY, 100).unwrap();
        assert_eq!(counter, 4);
        assert_eq!(parsed, g);
    }

    #[test]
    fn round_trips_every_variant() {
        round_trip(Gossip::Query);
        round_trip(Gossip::Passive);
        round_trip(Gossip::Forget);
        round_trip(Gossip::Index(Index {
            genesis: Hash::new("G"),
            highest: Hash::new("H"),
            height: 42,
            timestamp: 1_700_000_000,
            peers: vec!["gossip://u@host:9000/".to_string()],
        }));
        round_trip(Gossip::Block(OpaquePayload(serde_json::json!({"height": 1}))));
        round_trip(Gossip::Transaction(OpaquePayload(serde_json::json!({"amount": 1}))));
        round_trip(Gossip::Fetch {
            hash: Hash::new("H5"),
            extra: 3,
        });
        let mut extra = HashMap::new();
        extra.insert("H4".to_string(), OpaquePayload(serde_json::json!({"height": 4})));
        round_trip(Gossip::Result {
            block: OpaquePayload(serde_json::json!({"height": 5})),
            extra,
        });
        round_trip(Gossip::Error("not found".to_string()));
    }

    #[test]
    fn missing_action_key_is_rejected() {
        let object = serde_json::json!({"not_t": "query"});
        let err = parse_object(&object, ACTION_KEY, 10).unwrap_err();
        assert_eq!(err, GossipError::MissingActionKey);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let object = serde_json::json!({"t": "teleport"});
        let err = parse_object(&object, ACTION_KEY, 10).unwrap_err();
        assert_eq!(err, GossipError::UnknownAction("teleport".to_string()));
    }

    #[test]
    fn result_extra_over_limit_is_rejected() {
        let mut extra = Map::new();
        extra.insert("a".to_string(), serde_json::json!({}));
        extra.insert("b".to_string(), serde_json::json!({}));
        let object = serde_json::json!({
            "t": "result",
            "block": {},
            "extra": Value::Object(extra),
        });
        let err = parse_object(&object, ACTION_KEY, 1).unwrap_err();
        assert_eq!(err, GossipError::LimitExceeded);
    }

    #[test]
    fn fetch_extra_over_limit_still_parses() {
        // `fetch.extra` is bounded at the peer level, not here — see the
        // comment on the "fetch" arm of `parse_object`.
        let object = serde_json::json!({"t": "fetch", "hash": "H", "extra": 5});
        let parsed = parse_object(&object, ACTION_KEY, 2).unwrap();
        assert_eq!(parsed, Gossip::Fetch { hash: Hash::new("H"), extra: 5 });
    }

    #[test]
    fn index_equality_is_field_wise() {
        let a = Index {
            genesis: Hash::new("G"),
            highest: Hash::new("H"),
            height: 1,
            timestamp: 10,
            peers: vec![],
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.height = 2;
        assert_ne!(a, b);
    }

    #[test]
    fn counter_tolerates_a_whole_valued_float_encoding() {
        // Not every platform on the wire normalizes a whole-valued number to
        // an integer encoding before serializing it — spec.md §4.1 requires
        // tolerating both.
        let frame = format!(r#"[4.0, {{"{ACTION_KEY}": "query"}}]"#);
        let (counter, gossip) = parse_frame(&frame, ACTION_KEY, 10).unwrap();
        assert_eq!(counter, 4);
        assert_eq!(gossip, Gossip::Query);
    }

    #[test]
    fn fetch_extra_tolerates_a_whole_valued_float_encoding() {
        let object = serde_json::json!({"t": "fetch", "hash": "H", "extra": 5.0});
        let parsed = parse_object(&object, ACTION_KEY, 10).unwrap();
        assert_eq!(parsed, Gossip::Fetch { hash: Hash::new("H"), extra: 5 });
    }

    #[test]
    fn index_height_and_timestamp_tolerate_whole_valued_float_encodings() {
        let idx_value = serde_json::json!({
            "genesis": "G",
            "highest": "H",
            "height": 42.0,
            "time": 1_700_000_000.0,
            "peers": [],
        });
        let object = serde_json::json!({"t": "index", "index": idx_value});
        let parsed = parse_object(&object, ACTION_KEY, 10).unwrap();
        assert_eq!(
            parsed,
            Gossip::Index(Index {
                genesis: Hash::new("G"),
                highest: Hash::new("H"),
                height: 42,
                timestamp: 1_700_000_000,
                peers: vec![],
            })
        );
    }

    #[test]
    fn non_whole_valued_float_is_rejected() {
        let object = serde_json::json!({"t": "fetch", "hash": "H", "extra": 5.5});
        // not a whole number, so `tolerant_u64` refuses it and the field
        // falls back to its default rather than silently truncating.
        let parsed = parse_object(&object, ACTION_KEY, 10).unwrap();
        assert_eq!(parsed, Gossip::Fetch { hash: Hash::new("H"), extra: 0 });
    }
}
