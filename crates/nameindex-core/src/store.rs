//! The index store contract: the only owner of durable index state.
//!
//! Every mutating operation is atomic: the record set and the indexed height
//! change together or not at all.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{IndexStatus, NameRecord};

/// Layout version this build reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Height a fresh index starts from; the block after it is the first scanned.
pub const DEFAULT_GENESIS_HEIGHT: u64 = 563_719;

/// Result of [`IndexStore::apply_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The block was committed with this many records.
    Applied { records: usize },
    /// The block was at or below the indexed height; nothing was written.
    AlreadyApplied,
}

/// Persistent name index.
///
/// Implementations: [`MemoryIndexStore`] and the SQLite backend in
/// `nameindex-storage`.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Read the full status row set.
    async fn status(&self) -> Result<IndexStatus, IndexerError>;

    /// Highest block height fully reflected in the index.
    async fn current_height(&self) -> Result<u64, IndexerError> {
        Ok(self.status().await?.indexed_height)
    }

    /// Insert `records` and set the indexed height to `height` in one
    /// transaction.
    ///
    /// A `height` at or below the indexed height is a silent no-op. A height
    /// that skips blocks fails with [`IndexerError::HeightGap`].
    async fn apply_block(
        &self,
        height: u64,
        records: &[NameRecord],
    ) -> Result<ApplyOutcome, IndexerError>;

    /// Delete every record at `height` or above and set the indexed height to
    /// `height - 1`, in one transaction. Returns the number of deleted records.
    ///
    /// A `height` above the indexed height has nothing to drop and is a no-op.
    async fn truncate_to(&self, height: u64) -> Result<u64, IndexerError>;

    /// All records registering `name`, oldest first.
    async fn lookup(&self, name: &str) -> Result<Vec<NameRecord>, IndexerError>;

    /// Total number of records in the index.
    async fn record_count(&self) -> Result<u64, IndexerError>;
}

/// Fail unless `found` is the version this build understands.
pub fn check_schema_version(found: i64) -> Result<(), IndexerError> {
    if found != SCHEMA_VERSION {
        return Err(IndexerError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Decide what `apply_block(height, …)` must do given the indexed height.
///
/// Returns `Ok(false)` for an already applied block, `Ok(true)` for the next
/// block, and an error for a gap.
pub fn check_next_height(indexed: u64, height: u64) -> Result<bool, IndexerError> {
    if height <= indexed {
        return Ok(false);
    }
    if height != indexed + 1 {
        return Err(IndexerError::HeightGap { height, indexed });
    }
    Ok(true)
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

struct MemoryState {
    status: IndexStatus,
    records: Vec<NameRecord>,
}

/// In-memory index store for tests and ephemeral indexers.
///
/// A single mutex guards records and status together, which gives the same
/// all-or-nothing visibility as a database transaction.
pub struct MemoryIndexStore {
    state: Mutex<MemoryState>,
}

impl MemoryIndexStore {
    /// Create an empty index starting at `genesis_height`.
    pub fn new(genesis_height: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                status: IndexStatus {
                    indexed_height: genesis_height,
                    schema_version: SCHEMA_VERSION,
                    updated_at: None,
                },
                records: Vec::new(),
            }),
        }
    }

    /// Reopen previously persisted state, refusing unknown schema versions.
    pub fn open(status: IndexStatus, records: Vec<NameRecord>) -> Result<Self, IndexerError> {
        check_schema_version(status.schema_version)?;
        Ok(Self {
            state: Mutex::new(MemoryState { status, records }),
        })
    }

    /// Snapshot of every record, in insertion order.
    pub fn records(&self) -> Vec<NameRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a panicking test thread; the data is
        // still consistent because every mutation completes under the guard.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn status(&self) -> Result<IndexStatus, IndexerError> {
        Ok(self.lock().status)
    }

    async fn apply_block(
        &self,
        height: u64,
        records: &[NameRecord],
    ) -> Result<ApplyOutcome, IndexerError> {
        let mut state = self.lock();
        if !check_next_height(state.status.indexed_height, height)? {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        state.records.extend_from_slice(records);
        state.status.indexed_height = height;
        state.status.updated_at = Some(chrono::Utc::now().timestamp());
        Ok(ApplyOutcome::Applied {
            records: records.len(),
        })
    }

    async fn truncate_to(&self, height: u64) -> Result<u64, IndexerError> {
        let mut state = self.lock();
        if height > state.status.indexed_height {
            return Ok(0);
        }
        let before = state.records.len();
        state.records.retain(|r| r.block_height < height);
        state.status.indexed_height = height.saturating_sub(1);
        state.status.updated_at = Some(chrono::Utc::now().timestamp());
        Ok((before - state.records.len()) as u64)
    }

    async fn lookup(&self, name: &str) -> Result<Vec<NameRecord>, IndexerError> {
        let mut found: Vec<_> = self
            .lock()
            .records
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.block_height);
        Ok(found)
    }

    async fn record_count(&self) -> Result<u64, IndexerError> {
        Ok(self.lock().records.len() as u64)
    }
}
