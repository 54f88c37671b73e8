//! Node client boundary: what the indexer needs from a full node.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::sequencer::EventSink;
use crate::types::{NodeBlock, NodeTransaction};

/// Read access to the node's view of the chain.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Height of the node's current tip.
    async fn best_height(&self) -> Result<u64, IndexerError>;

    /// Hash (display hex) of the main-chain block at `height`.
    async fn block_hash(&self, height: u64) -> Result<String, IndexerError>;

    /// Full main-chain block at `height`.
    async fn block_by_height(&self, height: u64) -> Result<NodeBlock, IndexerError>;
}

/// A source of block connect/disconnect notifications.
///
/// `subscribe` starts delivery into `sink` (usually from a spawned task) and
/// returns once the subscription is established. Delivery ends by dropping
/// the sink.
#[async_trait]
pub trait BlockSubscriber: Send + Sync {
    async fn subscribe(&self, sink: EventSink) -> Result<(), IndexerError>;
}

// ─── In-memory node (for testing) ─────────────────────────────────────────────

#[derive(Default)]
struct MemoryChain {
    blocks: BTreeMap<u64, NodeBlock>,
    pending_failures: u32,
    fetches: u64,
}

/// A scripted in-memory chain implementing [`NodeClient`].
///
/// Blocks can be appended, replaced (to simulate a reorg) or removed, and
/// transport failures can be injected to exercise retry paths.
#[derive(Default)]
pub struct MemoryNode {
    chain: Mutex<MemoryChain>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block on top of the current tip (or at `base + 1` for an
    /// empty chain started with [`MemoryNode::set_block`]).
    pub fn push_block(&self, transactions: Vec<NodeTransaction>) -> u64 {
        let mut chain = self.lock();
        let height = chain.blocks.keys().next_back().map_or(0, |h| h + 1);
        chain.blocks.insert(height, memory_block(height, "a", transactions));
        height
    }

    /// Insert or replace the block at `height`. `fork` tags the hash so a
    /// replaced block differs from the original.
    pub fn set_block(&self, height: u64, fork: &str, transactions: Vec<NodeTransaction>) {
        self.lock()
            .blocks
            .insert(height, memory_block(height, fork, transactions));
    }

    /// Remove every block at `height` or above (the tip retreats).
    pub fn truncate(&self, height: u64) {
        self.lock().blocks.retain(|h, _| *h < height);
    }

    /// Make the next `n` node calls fail with a transient transport error.
    pub fn fail_next(&self, n: u32) {
        self.lock().pending_failures = n;
    }

    /// Number of successful `block_by_height` calls so far.
    pub fn fetch_count(&self) -> u64 {
        self.lock().fetches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryChain> {
        self.chain.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(chain: &mut MemoryChain) -> Result<(), IndexerError> {
        if chain.pending_failures > 0 {
            chain.pending_failures -= 1;
            return Err(IndexerError::Rpc("injected failure".into()));
        }
        Ok(())
    }
}

fn memory_block(height: u64, fork: &str, transactions: Vec<NodeTransaction>) -> NodeBlock {
    NodeBlock {
        height,
        hash: format!("{fork}-{height:08}"),
        transactions,
    }
}

fn out_of_range(height: u64) -> IndexerError {
    IndexerError::Node {
        code: -8,
        message: format!("Block height {height} out of range"),
    }
}

#[async_trait]
impl NodeClient for MemoryNode {
    async fn best_height(&self) -> Result<u64, IndexerError> {
        let mut chain = self.lock();
        Self::check_failure(&mut chain)?;
        Ok(chain.blocks.keys().next_back().copied().unwrap_or(0))
    }

    async fn block_hash(&self, height: u64) -> Result<String, IndexerError> {
        let mut chain = self.lock();
        Self::check_failure(&mut chain)?;
        chain
            .blocks
            .get(&height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| out_of_range(height))
    }

    async fn block_by_height(&self, height: u64) -> Result<NodeBlock, IndexerError> {
        let mut chain = self.lock();
        Self::check_failure(&mut chain)?;
        let block = chain
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| out_of_range(height))?;
        chain.fetches += 1;
        Ok(block)
    }
}
