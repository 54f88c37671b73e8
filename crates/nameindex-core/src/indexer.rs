//! Indexer configuration and the startup/run sequence.
//!
//! # Startup
//! 1. Catch up from the persisted height to the node tip.
//! 2. Subscribe to block notifications (events queue up from here on),
//!    retrying transient failures like any node call.
//! 3. Catch up again, closing the gap between (1) and (2).
//! 4. Hand the queue to the [`EventSequencer`] until the stream ends.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::IndexerError;
use crate::node::{BlockSubscriber, NodeClient};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::sequencer::{self, EventSequencer};
use crate::store::{IndexStore, DEFAULT_GENESIS_HEIGHT};
use crate::sync::SyncEngine;

/// Configuration for an indexer instance.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Indexed height of a freshly created store.
    pub genesis_height: u64,
    /// Poll interval when notifications come from polling the node.
    pub poll_interval: Duration,
    /// Backoff for transient node failures.
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            genesis_height: DEFAULT_GENESIS_HEIGHT,
            poll_interval: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

/// Wires store, node and notification source together and runs them.
pub struct NameIndexer {
    sync: SyncEngine,
    subscriber: Arc<dyn BlockSubscriber>,
    retry: RetryPolicy,
}

impl NameIndexer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        node: Arc<dyn NodeClient>,
        subscriber: Arc<dyn BlockSubscriber>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            sync: SyncEngine::new(store, node),
            subscriber,
            retry: RetryPolicy::new(retry),
        }
    }

    /// Run until the notification stream ends (`Ok`) or a fatal error occurs.
    ///
    /// Returns the number of block events processed.
    pub async fn run(self) -> Result<u64, IndexerError> {
        let status = self.sync.store().status().await?;
        info!(
            indexed = status.indexed_height,
            version = status.schema_version,
            "index opened"
        );

        self.retry.run("initial catch-up", || self.sync.catch_up()).await?;
        info!("index is up to date");

        let (sink, queue) = sequencer::channel();
        self.retry
            .run("subscribe", || self.subscriber.subscribe(sink.clone()))
            .await?;
        // The subscriber holds its own clone; the queue ends when that drops.
        drop(sink);
        info!("waiting for new blocks");

        self.retry.run("post-subscribe catch-up", || self.sync.catch_up()).await?;

        EventSequencer::new(self.sync, queue, self.retry).run().await
    }
}
