//! nameindex-core — the synchronization and indexing engine for on-chain
//! name registrations.
//!
//! # Architecture
//!
//! ```text
//! NameIndexer
//!   ├── SyncEngine       (walk node blocks → parse outputs → apply per block)
//!   ├── ReorgHandler     (truncate on disconnect, then resync to tip)
//!   ├── EventSequencer   (one consumer for all block notifications)
//!   ├── script           (name-registration payload parser)
//!   └── IndexStore       (memory here; SQLite in nameindex-storage)
//! ```

pub mod error;
pub mod indexer;
pub mod node;
pub mod reorg;
pub mod retry;
pub mod script;
pub mod sequencer;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod types;
pub mod watcher;

pub use error::IndexerError;
pub use indexer::{IndexerConfig, NameIndexer};
pub use node::{BlockSubscriber, MemoryNode, NodeClient};
pub use reorg::{ReorgHandler, ReorgReport};
pub use retry::{RetryConfig, RetryPolicy};
pub use script::parse_name;
pub use sequencer::{EventQueue, EventSequencer, EventSink};
pub use store::{ApplyOutcome, IndexStore, MemoryIndexStore, SCHEMA_VERSION};
pub use sync::{SyncEngine, SyncReport};
pub use tracker::BlockTracker;
pub use types::{BlockEvent, BlockHeader, IndexStatus, NameRecord, NodeBlock, NodeTransaction, TxId, TxOutput};
pub use watcher::PollingWatcher;
