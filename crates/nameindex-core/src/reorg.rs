//! Reorg recovery.
//!
//! A disconnect notification only says that the block at some height left
//! the main chain; it does not say what replaced it or where the new tip is.
//! Recovery is therefore always "truncate, then catch up to the node's
//! current tip", which also covers reorgs that replace several blocks.

use tracing::{info, warn};

use crate::error::IndexerError;
use crate::sync::{SyncEngine, SyncReport};

/// Outcome of handling one disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorgReport {
    /// Height the disconnect was reported at.
    pub disconnected_at: u64,
    /// Records removed by the truncation.
    pub records_dropped: u64,
    /// The catch-up run that followed.
    pub resync: SyncReport,
}

/// Rolls the index back and re-walks the chain forward.
#[derive(Clone)]
pub struct ReorgHandler {
    sync: SyncEngine,
}

impl ReorgHandler {
    pub fn new(sync: SyncEngine) -> Self {
        Self { sync }
    }

    /// Drop everything at `height` and above, then catch up to the node tip.
    pub async fn handle_disconnect(&self, height: u64) -> Result<ReorgReport, IndexerError> {
        let indexed = self.sync.store().current_height().await?;
        let records_dropped = self.sync.store().truncate_to(height).await?;
        if height <= indexed {
            warn!(
                height,
                indexed,
                depth = indexed + 1 - height,
                records_dropped,
                "block disconnected, index rolled back"
            );
        }

        let resync = self.sync.catch_up().await?;
        info!(
            from = height,
            to = resync.end_height,
            "index resynced after reorg"
        );
        Ok(ReorgReport {
            disconnected_at: height,
            records_dropped,
            resync,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::node::MemoryNode;
    use crate::script::registration_script;
    use crate::store::{IndexStore, MemoryIndexStore};
    use crate::types::{NodeTransaction, TxId, TxOutput};

    fn name_tx(id: u8, name: &str) -> NodeTransaction {
        NodeTransaction {
            txid: TxId([id; 32]),
            outputs: vec![TxOutput {
                value: 0,
                script: registration_script(name.as_bytes(), &[0x01, 0x02]),
            }],
        }
    }

    fn chain_100_to_103() -> Arc<MemoryNode> {
        let node = Arc::new(MemoryNode::new());
        node.set_block(100, "a", vec![]);
        for h in 101..=103 {
            node.set_block(h, "a", vec![name_tx(h as u8, &format!("orig{h}"))]);
        }
        node
    }

    #[tokio::test]
    async fn disconnect_rolls_back_and_resyncs_new_chain() {
        let node = chain_100_to_103();
        let store = Arc::new(MemoryIndexStore::new(100));
        let sync = SyncEngine::new(store.clone(), node.clone());
        sync.catch_up().await.unwrap();
        assert_eq!(store.current_height().await.unwrap(), 103);

        // Reorg: 101..=103 replaced, chain extended to 105.
        for h in 101..=105 {
            node.set_block(h, "b", vec![name_tx(h as u8 + 100, &format!("fork{h}"))]);
        }

        let handler = ReorgHandler::new(sync);
        let report = handler.handle_disconnect(101).await.unwrap();

        assert_eq!(report.records_dropped, 3);
        assert_eq!(report.resync.start_height, 100);
        assert_eq!(report.resync.end_height, 105);

        let names: Vec<_> = store.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["fork101", "fork102", "fork103", "fork104", "fork105"]);
    }

    #[tokio::test]
    async fn truncate_then_resync_reproduces_records() {
        let node = chain_100_to_103();
        let store = Arc::new(MemoryIndexStore::new(100));
        let sync = SyncEngine::new(store.clone(), node);
        sync.catch_up().await.unwrap();
        let before = store.records();

        ReorgHandler::new(sync).handle_disconnect(102).await.unwrap();

        assert_eq!(store.records(), before);
        assert_eq!(store.current_height().await.unwrap(), 103);
    }

    #[tokio::test]
    async fn disconnect_with_retreated_tip_stops_at_new_tip() {
        let node = chain_100_to_103();
        let store = Arc::new(MemoryIndexStore::new(100));
        let sync = SyncEngine::new(store.clone(), node.clone());
        sync.catch_up().await.unwrap();

        node.truncate(103);
        let report = ReorgHandler::new(sync).handle_disconnect(103).await.unwrap();

        assert_eq!(report.records_dropped, 1);
        assert_eq!(store.current_height().await.unwrap(), 102);
        assert_eq!(store.record_count().await.unwrap(), 2);
    }
}
