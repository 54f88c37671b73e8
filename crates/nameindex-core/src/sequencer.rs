//! Event sequencer: funnels asynchronous chain notifications into one
//! consumer so index mutations never overlap.
//!
//! ```text
//! node callbacks ──► EventSink ──► unbounded queue ──► EventSequencer::run
//!                                                        ├── Connected    → SyncEngine::catch_up
//!                                                        └── Disconnected → ReorgHandler::handle_disconnect
//! ```
//!
//! The queue is unbounded: a producer never blocks and an event is never
//! dropped. A lost disconnect would leave stale records in the index.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::IndexerError;
use crate::reorg::ReorgHandler;
use crate::retry::RetryPolicy;
use crate::sync::SyncEngine;
use crate::types::BlockEvent;

/// Create a connected sink/queue pair.
pub fn channel() -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventQueue { rx })
}

/// Producer handle given to notification sources. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BlockEvent>,
}

impl EventSink {
    pub fn send(&self, event: BlockEvent) -> Result<(), IndexerError> {
        self.tx.send(event).map_err(|_| IndexerError::ChannelClosed)
    }

    /// A block was connected at `height`.
    pub fn connected(&self, height: u64) -> Result<(), IndexerError> {
        self.send(BlockEvent::Connected(height))
    }

    /// The block at `height` was disconnected.
    pub fn disconnected(&self, height: u64) -> Result<(), IndexerError> {
        self.send(BlockEvent::Disconnected(height))
    }

    /// `true` once the consumer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end of the event channel.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<BlockEvent>,
}

impl EventQueue {
    /// Wait for the next event; `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        self.rx.recv().await
    }
}

/// The single consumer of block events.
pub struct EventSequencer {
    sync: SyncEngine,
    reorg: ReorgHandler,
    queue: EventQueue,
    retry: RetryPolicy,
}

impl EventSequencer {
    pub fn new(sync: SyncEngine, queue: EventQueue, retry: RetryPolicy) -> Self {
        Self {
            reorg: ReorgHandler::new(sync.clone()),
            sync,
            queue,
            retry,
        }
    }

    /// Process events until every sink is dropped or an event fails.
    ///
    /// Returns the number of events processed. Transient node errors are
    /// retried on the same event; anything else ends the loop.
    pub async fn run(mut self) -> Result<u64, IndexerError> {
        let mut processed = 0u64;
        while let Some(event) = self.queue.recv().await {
            let what = format!("processing {event}");
            self.retry.run(&what, || self.process(event)).await?;
            processed += 1;
        }
        info!(processed, "block event stream closed");
        Ok(processed)
    }

    /// Apply a single event to the index.
    pub async fn process(&self, event: BlockEvent) -> Result<(), IndexerError> {
        debug!(%event, "block event");
        match event {
            // A connect means "the tip moved"; resync rather than applying
            // exactly this block, so coalesced or racing notifications
            // cannot open a gap.
            BlockEvent::Connected(height) => {
                let report = self.sync.catch_up().await?;
                if report.blocks_applied > 0 {
                    info!(notified = height, indexed = report.end_height, "new block indexed");
                }
            }
            BlockEvent::Disconnected(height) => {
                self.reorg.handle_disconnect(height).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::node::MemoryNode;
    use crate::retry::RetryConfig;
    use crate::script::registration_script;
    use crate::store::{IndexStore, MemoryIndexStore};
    use crate::types::{NodeTransaction, TxId, TxOutput};

    fn name_tx(id: u8, name: &str) -> NodeTransaction {
        NodeTransaction {
            txid: TxId([id; 32]),
            outputs: vec![TxOutput {
                value: 546,
                script: registration_script(name.as_bytes(), &[0x01, 0x02]),
            }],
        }
    }

    fn setup(tip: u64) -> (Arc<MemoryNode>, Arc<MemoryIndexStore>, SyncEngine) {
        let node = Arc::new(MemoryNode::new());
        node.set_block(100, "a", vec![]);
        for h in 101..=tip {
            node.set_block(h, "a", vec![name_tx(h as u8, &format!("n{h}"))]);
        }
        let store = Arc::new(MemoryIndexStore::new(100));
        let sync = SyncEngine::new(store.clone(), node.clone());
        (node, store, sync)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        })
    }

    #[test]
    fn sink_reports_closed_queue() {
        let (sink, queue) = channel();
        drop(queue);
        assert!(sink.is_closed());
        assert!(matches!(sink.connected(1), Err(IndexerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn connect_events_resync_to_tip() {
        let (_node, store, sync) = setup(103);
        let (sink, queue) = channel();

        // Only one notification for three new blocks: still fully synced.
        sink.connected(101).unwrap();
        drop(sink);

        let processed = EventSequencer::new(sync, queue, fast_retry()).run().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(store.current_height().await.unwrap(), 103);
        assert_eq!(store.record_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn disconnect_event_rolls_back_and_resyncs() {
        let (node, store, sync) = setup(103);
        sync.catch_up().await.unwrap();

        for h in 101..=105 {
            node.set_block(h, "b", vec![name_tx(h as u8, &format!("b{h}"))]);
        }
        let (sink, queue) = channel();
        sink.disconnected(101).unwrap();
        drop(sink);

        EventSequencer::new(sync, queue, fast_retry()).run().await.unwrap();

        assert_eq!(store.current_height().await.unwrap(), 105);
        let names: Vec<_> = store.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["b101", "b102", "b103", "b104", "b105"]);
    }

    #[tokio::test]
    async fn events_are_processed_in_order_from_many_producers() {
        let (node, store, sync) = setup(102);
        let (sink, queue) = channel();
        let consumer = tokio::spawn(EventSequencer::new(sync, queue, fast_retry()).run());

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let sink = sink.clone();
                tokio::spawn(async move {
                    sink.connected(101 + i).unwrap();
                })
            })
            .collect();
        for p in producers {
            p.await.unwrap();
        }
        node.set_block(103, "a", vec![name_tx(103, "late")]);
        sink.connected(103).unwrap();
        drop(sink);

        assert_eq!(consumer.await.unwrap().unwrap(), 5);
        assert_eq!(store.current_height().await.unwrap(), 103);
        assert_eq!(store.lookup("late").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_node_errors_are_retried() {
        let (node, store, sync) = setup(102);
        let (sink, queue) = channel();
        node.fail_next(2);
        sink.connected(102).unwrap();
        drop(sink);

        EventSequencer::new(sync, queue, fast_retry()).run().await.unwrap();
        assert_eq!(store.current_height().await.unwrap(), 102);
    }

    #[tokio::test]
    async fn persistent_failure_ends_the_loop() {
        let (node, store, sync) = setup(102);
        let (sink, queue) = channel();
        node.fail_next(100);
        sink.connected(102).unwrap();

        let err = EventSequencer::new(sync, queue, fast_retry()).run().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.current_height().await.unwrap(), 100);
    }
}
