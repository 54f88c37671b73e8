//! End-to-end sync scenarios against a file-backed SQLite index.

use std::sync::Arc;
use std::time::Duration;

use nameindex_core::script::registration_script;
use nameindex_core::sequencer::{self, EventSequencer};
use nameindex_core::{
    IndexStore, MemoryNode, NodeTransaction, ReorgHandler, RetryConfig, RetryPolicy, SyncEngine, TxId,
    TxOutput,
};
use nameindex_storage::SqliteStore;

fn name_tx(id: u8, name: &str) -> NodeTransaction {
    NodeTransaction {
        txid: TxId([id; 32]),
        outputs: vec![
            TxOutput {
                value: 1_000,
                script: vec![0x76, 0xa9, 0x14],
            },
            TxOutput {
                value: 0,
                script: registration_script(name.as_bytes(), &[0x01; 21]),
            },
        ],
    }
}

fn chain_100_to_103() -> Arc<MemoryNode> {
    let node = Arc::new(MemoryNode::new());
    node.set_block(100, "a", vec![]);
    for (i, name) in ["alice", "bob", "carol"].iter().enumerate() {
        let h = 101 + i as u64;
        node.set_block(h, "a", vec![name_tx(h as u8, name)]);
    }
    node
}

async fn open_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let path = dir.path().join("index.db").display().to_string();
    Arc::new(SqliteStore::open(&path, 100).await.unwrap())
}

#[tokio::test]
async fn catch_up_writes_every_block() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let sync = SyncEngine::new(store.clone(), chain_100_to_103());

    let report = sync.catch_up().await.unwrap();
    assert_eq!(report.blocks_applied, 3);
    assert_eq!(report.records_inserted, 3);

    assert_eq!(store.current_height().await.unwrap(), 103);
    let bob = store.lookup("bob").await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].block_height, 102);
    assert_eq!(bob[0].txid, TxId([102; 32]));
}

#[tokio::test]
async fn disconnect_replaces_orphaned_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let node = chain_100_to_103();
    let sync = SyncEngine::new(store.clone(), node.clone());
    sync.catch_up().await.unwrap();

    for h in 101..=105 {
        node.set_block(h, "b", vec![name_tx(h as u8 + 50, &format!("fork{h}"))]);
    }
    let report = ReorgHandler::new(sync).handle_disconnect(101).await.unwrap();
    assert_eq!(report.records_dropped, 3);

    assert_eq!(store.current_height().await.unwrap(), 105);
    assert!(store.lookup("alice").await.unwrap().is_empty());
    let names: Vec<_> = store.all_records().await.unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["fork101", "fork102", "fork103", "fork104", "fork105"]);
}

#[tokio::test]
async fn truncate_and_resync_reproduces_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let sync = SyncEngine::new(store.clone(), chain_100_to_103());
    sync.catch_up().await.unwrap();
    let before = store.all_records().await.unwrap();

    store.truncate_to(101).await.unwrap();
    assert_eq!(store.record_count().await.unwrap(), 0);
    sync.catch_up().await.unwrap();

    assert_eq!(store.all_records().await.unwrap(), before);
}

#[tokio::test]
async fn sequencer_drives_sqlite_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let node = chain_100_to_103();
    let sync = SyncEngine::new(store.clone(), node.clone());
    sync.catch_up().await.unwrap();

    let (sink, queue) = sequencer::channel();
    let retry = RetryPolicy::new(RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        multiplier: 2.0,
    });
    let consumer = tokio::spawn(EventSequencer::new(sync, queue, retry).run());

    node.set_block(104, "a", vec![name_tx(104, "dave")]);
    node.fail_next(1);
    sink.connected(104).unwrap();
    node.set_block(103, "c", vec![name_tx(203, "erin")]);
    node.truncate(104);
    sink.disconnected(103).unwrap();
    drop(sink);

    assert_eq!(consumer.await.unwrap().unwrap(), 2);
    assert_eq!(store.current_height().await.unwrap(), 103);
    assert!(store.lookup("carol").await.unwrap().is_empty());
    assert!(store.lookup("dave").await.unwrap().is_empty());
    assert_eq!(store.lookup("erin").await.unwrap().len(), 1);
}

#[tokio::test]
async fn restart_resumes_from_persisted_height() {
    let dir = tempfile::tempdir().unwrap();
    let node = chain_100_to_103();
    {
        let store = open_store(&dir).await;
        SyncEngine::new(store.clone(), node.clone()).catch_up().await.unwrap();
        store.close().await;
    }

    node.set_block(104, "a", vec![name_tx(104, "dave")]);
    let store = open_store(&dir).await;
    let report = SyncEngine::new(store.clone(), node).catch_up().await.unwrap();
    assert_eq!(report.start_height, 103);
    assert_eq!(report.blocks_applied, 1);
    assert_eq!(store.record_count().await.unwrap(), 4);
}
