//! Polling block watcher: a [`BlockSubscriber`] for nodes without push
//! notifications.
//!
//! Every poll compares the tracked headers with the node's main chain,
//! newest first. A tracked block the node no longer has (tip retreated or
//! hash replaced) yields `Disconnected(lowest mismatching height)`; new blocks
//! above the tracked head yield one `Connected(tip)`.
//!
//! When every tracked header was replaced the fork point is unknown. The
//! watcher then reports a disconnect one full window below the oldest
//! tracked height, so reorgs up to twice the window deep are rolled back
//! completely. Anything deeper leaves records from orphaned blocks below
//! that point; run with a window larger than any reorg the node accepts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::IndexerError;
use crate::node::{BlockSubscriber, NodeClient};
use crate::sequencer::EventSink;
use crate::tracker::BlockTracker;
use crate::types::BlockHeader;

/// Headers kept for fork detection.
pub const DEFAULT_WINDOW: usize = 128;

/// Polls a [`NodeClient`] and turns tip changes into block events.
pub struct PollingWatcher {
    node: Arc<dyn NodeClient>,
    interval: Duration,
    window: usize,
}

impl PollingWatcher {
    pub fn new(node: Arc<dyn NodeClient>, interval: Duration) -> Self {
        Self {
            node,
            interval,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl BlockSubscriber for PollingWatcher {
    async fn subscribe(&self, sink: EventSink) -> Result<(), IndexerError> {
        let mut tracker = BlockTracker::new(self.window);
        // Seed with the current tip so the first poll only reports changes.
        let tip = self.node.best_height().await?;
        let hash = self.node.block_hash(tip).await?;
        tracker.push(BlockHeader { height: tip, hash }).ok();
        info!(tip, interval_ms = self.interval.as_millis() as u64, "polling node for new blocks");

        let node = self.node.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if sink.is_closed() {
                    return;
                }
                match poll_once(node.as_ref(), &mut tracker, &sink).await {
                    Ok(()) => {}
                    Err(IndexerError::ChannelClosed) => return,
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "block poll failed");
                    }
                    Err(e) => {
                        error!(error = %e, "block watcher stopped");
                        return;
                    }
                }
            }
        });
        Ok(())
    }
}

/// Compare `tracker` with the node once and emit the resulting events.
pub async fn poll_once(
    node: &dyn NodeClient,
    tracker: &mut BlockTracker,
    sink: &EventSink,
) -> Result<(), IndexerError> {
    let tip = node.best_height().await?;

    let mut stale_from = None;
    let mut common_ancestor = false;
    for tracked in tracker.newest_first() {
        if tracked.height <= tip && node.block_hash(tracked.height).await? == tracked.hash {
            common_ancestor = true;
            break;
        }
        stale_from = Some(tracked.height);
    }
    if let Some(oldest_stale) = stale_from {
        let height = if common_ancestor {
            oldest_stale
        } else {
            let rewind = oldest_stale.saturating_sub(tracker.capacity() as u64);
            warn!(
                oldest_tracked = oldest_stale,
                rewind_to = rewind,
                "fork point is older than the tracked window"
            );
            rewind
        };
        tracker.rewind_to(height.saturating_sub(1));
        sink.disconnected(height)?;
    }

    let mut next = tracker.head().map_or(tip, |h| h.height + 1);
    let mut connected = false;
    while next <= tip {
        let hash = node.block_hash(next).await?;
        tracker.push(BlockHeader { height: next, hash }).ok();
        connected = true;
        next += 1;
    }
    if connected {
        sink.connected(tip)?;
    }
    Ok(())
}
