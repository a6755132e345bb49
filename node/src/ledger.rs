//! # In-Memory Ledger
//!
//! A minimal [`Ledger`] implementation sufficient to run the gossip core
//! end-to-end: it stores blocks in a `HashMap` keyed by hash and tracks the
//! longest chain it has seen by height, with no consensus, no fork choice
//! beyond "taller wins", and no persistence. A real deployment would swap
//! this for its own blockchain engine behind the same trait.

use std::collections::HashMap;

use gossip_core::node::{Hash, Ledger, LedgerError, OpaquePayload};
use parking_lot::Mutex;

struct State {
    genesis: Hash,
    blocks: HashMap<String, OpaquePayload>,
    highest: Hash,
    height: u64,
}

pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    /// Build a fresh ledger with just a genesis block at height 0.
    pub fn new(genesis: Hash) -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(genesis.as_str().to_string(), OpaquePayload(serde_json::json!({ "height": 0 })));
        Self {
            state: Mutex::new(State {
                highest: genesis.clone(),
                genesis,
                blocks,
                height: 0,
            }),
        }
    }
}

impl Ledger for MemoryLedger {
    fn genesis_hash(&self) -> Hash {
        self.state.lock().genesis.clone()
    }

    fn highest_hash(&self) -> Hash {
        self.state.lock().highest.clone()
    }

    fn height(&self) -> u64 {
        self.state.lock().height
    }

    fn get_block(&self, hash: &Hash) -> Option<OpaquePayload> {
        self.state.lock().blocks.get(hash.as_str()).cloned()
    }

    fn ingest_block(&self, block: OpaquePayload, _was_requested: bool) -> Result<(), LedgerError> {
        let hash = block_hash(&block).ok_or_else(|| LedgerError::Rejected("block has no hash field".to_string()))?;
        let height = block_height(&block).ok_or_else(|| LedgerError::Rejected("block has no height field".to_string()))?;

        let mut state = self.state.lock();
        state.blocks.insert(hash.as_str().to_string(), block);
        if height > state.height {
            state.height = height;
            state.highest = hash;
        }
        Ok(())
    }

    fn ingest_transaction(&self, _tx: OpaquePayload) -> Result<(), LedgerError> {
        // No mempool here — a transaction that reaches this ledger is
        // accepted and otherwise discarded; gossiping it onward is the
        // embedder's concern, not this stand-in ledger's.
        Ok(())
    }
}

fn block_hash(block: &OpaquePayload) -> Option<Hash> {
    block.0.as_object()?.get("hash")?.as_str().map(Hash::new)
}

fn block_height(block: &OpaquePayload) -> Option<u64> {
    block.0.as_object()?.get("height")?.as_u64()
}
