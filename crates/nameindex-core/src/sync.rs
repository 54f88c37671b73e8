//! Sync engine: walks the node's chain from the indexed height to the tip.
//!
//! One block per store transaction: a crash loses at most the block being
//! processed, and the store's already-applied guard makes the loop safe to
//! re-enter from any height after a restart.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::IndexerError;
use crate::node::NodeClient;
use crate::script::parse_name;
use crate::store::{ApplyOutcome, IndexStore};
use crate::types::{NameRecord, NodeBlock};

/// Summary of one catch-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Indexed height when the run started.
    pub start_height: u64,
    /// Indexed height when the run finished.
    pub end_height: u64,
    /// Blocks committed during the run.
    pub blocks_applied: u64,
    /// Records inserted during the run.
    pub records_inserted: u64,
}

/// Collect every name registration in `block`.
pub fn extract_records(block: &NodeBlock) -> Vec<NameRecord> {
    block
        .transactions
        .iter()
        .flat_map(|tx| {
            tx.outputs.iter().filter_map(move |out| {
                parse_name(&out.script).map(|name| NameRecord::new(block.height, name, tx.txid))
            })
        })
        .collect()
}

/// Drives the store forward using blocks fetched from the node.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn IndexStore>,
    node: Arc<dyn NodeClient>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn IndexStore>, node: Arc<dyn NodeClient>) -> Self {
        Self { store, node }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Catch up to whatever the node currently reports as its tip.
    pub async fn catch_up(&self) -> Result<SyncReport, IndexerError> {
        let tip = self.node.best_height().await?;
        self.catch_up_to(tip).await
    }

    /// Catch up to `tip`, following the node further if it advances meanwhile.
    pub async fn catch_up_to(&self, tip: u64) -> Result<SyncReport, IndexerError> {
        let mut height = self.store.current_height().await?;
        let mut tip = tip;
        let mut report = SyncReport {
            start_height: height,
            end_height: height,
            ..Default::default()
        };

        if height < tip {
            info!(indexed = height, tip, "catching up to node tip");
        }

        while height < tip {
            let next = height + 1;
            debug!(block = next, tip, "parsing block");

            let block = self.node.block_by_height(next).await?;
            let records = extract_records(&block);
            if let ApplyOutcome::Applied { records } = self.store.apply_block(next, &records).await? {
                report.blocks_applied += 1;
                report.records_inserted += records as u64;
                if records > 0 {
                    debug!(block = next, records, "names indexed");
                }
            }

            height = self.store.current_height().await?;
            tip = self.node.best_height().await?;
        }

        report.end_height = height;
        if report.blocks_applied > 0 {
            info!(
                from = report.start_height,
                to = report.end_height,
                blocks = report.blocks_applied,
                records = report.records_inserted,
                "catch-up complete"
            );
        }
        Ok(report)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
