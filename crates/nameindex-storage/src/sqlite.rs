//! SQLite storage backend for nameindex.
//!
//! Layout (compatible with existing cash-account index databases):
//!
//! ```text
//! nameindex(block INTEGER, name TEXT, txid BLOB)   -- no uniqueness
//! status(name TEXT PRIMARY KEY, data TEXT)         -- BlockHeight, Version, LastUpdate
//! ```
//!
//! Every mutation runs in one transaction that also updates `BlockHeight`,
//! so readers never see records without the matching height. WAL mode lets
//! read-only handles ([`SqliteStore::open_read_only`]) query while the
//! indexer writes.
//!
//! # Usage
//! ```rust,no_run
//! use nameindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./db.sqlite", 563_719).await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory(563_719).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use nameindex_core::error::IndexerError;
use nameindex_core::store::{check_next_height, check_schema_version, ApplyOutcome, IndexStore, SCHEMA_VERSION};
use nameindex_core::types::{IndexStatus, NameRecord, TxId};

const KEY_HEIGHT: &str = "BlockHeight";
const KEY_VERSION: &str = "Version";
const KEY_UPDATED: &str = "LastUpdate";

fn storage(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed name index.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the index database at `path`.
    ///
    /// A new database starts at `genesis_height`. An existing database with
    /// an unknown schema version is rejected before anything is written.
    pub async fn open(path: &str, genesis_height: u64) -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // One connection: the indexer is the only writer.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema(genesis_height).await?;
        Ok(store)
    }

    /// Open an existing database for queries only.
    ///
    /// The handle is separate from the writer's, so a query never observes
    /// a transaction mid-commit.
    pub async fn open_read_only(path: &str) -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::new().filename(path).read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        match store.stored_version().await? {
            Some(version) => check_schema_version(version)?,
            None => return Err(IndexerError::CorruptStatus("database has no status table".into())),
        }
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the store is dropped. Ideal for tests.
    pub async fn in_memory(genesis_height: u64) -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema(genesis_height).await?;
        Ok(store)
    }

    /// Close the underlying pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Every record in insertion order.
    pub async fn all_records(&self) -> Result<Vec<NameRecord>, IndexerError> {
        let rows = sqlx::query("SELECT block, name, txid FROM nameindex ORDER BY block, rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(record_from_row).collect()
    }

    /// Version recorded in an existing `status` table, `None` for a fresh file.
    async fn stored_version(&self) -> Result<Option<i64>, IndexerError> {
        let table = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'status'")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        if table.is_none() {
            return Ok(None);
        }

        let row = sqlx::query("SELECT data FROM status WHERE name = ?")
            .bind(KEY_VERSION)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| IndexerError::CorruptStatus("missing Version row".into()))?;
        let data: String = row.try_get("data").map_err(storage)?;
        parse_i64(KEY_VERSION, &data).map(Some)
    }

    /// Verify the version, then create tables and seed the status rows.
    async fn init_schema(&self, genesis_height: u64) -> Result<(), IndexerError> {
        if let Some(version) = self.stored_version().await? {
            check_schema_version(version)?;
        }

        // WAL: readers never block the writer
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nameindex (
                block INTEGER NOT NULL,
                name  TEXT    NOT NULL,
                txid  BLOB    NOT NULL
            );",
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS status (
                name TEXT NOT NULL PRIMARY KEY,
                data TEXT NOT NULL
            );",
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        // Range deletes on reorg and name lookups
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nameindex_block ON nameindex (block);")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nameindex_name ON nameindex (name);")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let seeded = sqlx::query("INSERT OR IGNORE INTO status (name, data) VALUES (?, ?), (?, ?)")
            .bind(KEY_HEIGHT)
            .bind(genesis_height.to_string())
            .bind(KEY_VERSION)
            .bind(SCHEMA_VERSION.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        if seeded.rows_affected() > 0 {
            info!(genesis_height, version = SCHEMA_VERSION, "created new index");
        }
        Ok(())
    }
}

fn parse_i64(key: &str, data: &str) -> Result<i64, IndexerError> {
    data.trim()
        .parse()
        .map_err(|_| IndexerError::CorruptStatus(format!("{key} = {data:?} is not an integer")))
}

fn record_from_row(row: &SqliteRow) -> Result<NameRecord, IndexerError> {
    let block: i64 = row.try_get("block").map_err(storage)?;
    let txid: Vec<u8> = row.try_get("txid").map_err(storage)?;
    Ok(NameRecord {
        block_height: block as u64,
        name: row.try_get("name").map_err(storage)?,
        txid: TxId::try_from(txid.as_slice())?,
    })
}

async fn read_height(conn: &mut SqliteConnection) -> Result<u64, IndexerError> {
    let row = sqlx::query("SELECT data FROM status WHERE name = ?")
        .bind(KEY_HEIGHT)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or_else(|| IndexerError::CorruptStatus("missing BlockHeight row".into()))?;
    let data: String = row.try_get("data").map_err(storage)?;
    let height = parse_i64(KEY_HEIGHT, &data)?;
    u64::try_from(height).map_err(|_| IndexerError::CorruptStatus(format!("negative BlockHeight {height}")))
}

async fn write_height(conn: &mut SqliteConnection, height: u64) -> Result<(), IndexerError> {
    sqlx::query("UPDATE status SET data = ? WHERE name = ?")
        .bind(height.to_string())
        .bind(KEY_HEIGHT)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;

    sqlx::query("INSERT OR REPLACE INTO status (name, data) VALUES (?, ?)")
        .bind(KEY_UPDATED)
        .bind(chrono::Utc::now().timestamp().to_string())
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    Ok(())
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStore {
    async fn status(&self) -> Result<IndexStatus, IndexerError> {
        let rows = sqlx::query("SELECT name, data FROM status")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        let (mut height, mut version, mut updated_at) = (None, None, None);
        for row in &rows {
            let name: String = row.try_get("name").map_err(storage)?;
            let data: String = row.try_get("data").map_err(storage)?;
            match name.as_str() {
                KEY_HEIGHT => height = Some(parse_i64(KEY_HEIGHT, &data)?),
                KEY_VERSION => version = Some(parse_i64(KEY_VERSION, &data)?),
                KEY_UPDATED => updated_at = Some(parse_i64(KEY_UPDATED, &data)?),
                _ => {}
            }
        }

        let height = height.ok_or_else(|| IndexerError::CorruptStatus("missing BlockHeight row".into()))?;
        Ok(IndexStatus {
            indexed_height: u64::try_from(height)
                .map_err(|_| IndexerError::CorruptStatus(format!("negative BlockHeight {height}")))?,
            schema_version: version.ok_or_else(|| IndexerError::CorruptStatus("missing Version row".into()))?,
            updated_at,
        })
    }

    async fn current_height(&self) -> Result<u64, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        read_height(&mut conn).await
    }

    async fn apply_block(
        &self,
        height: u64,
        records: &[NameRecord],
    ) -> Result<ApplyOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Dropping `tx` without commit rolls back.
        let indexed = read_height(&mut tx).await?;
        if !check_next_height(indexed, height)? {
            debug!(block = height, indexed, "block already applied");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        for record in records {
            sqlx::query("INSERT INTO nameindex (block, name, txid) VALUES (?, ?, ?)")
                .bind(record.block_height as i64)
                .bind(&record.name)
                .bind(&record.txid.as_bytes()[..])
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        write_height(&mut tx, height).await?;

        tx.commit().await.map_err(storage)?;
        debug!(block = height, records = records.len(), "block committed");
        Ok(ApplyOutcome::Applied {
            records: records.len(),
        })
    }

    async fn truncate_to(&self, height: u64) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let indexed = read_height(&mut tx).await?;
        if height > indexed {
            return Ok(0);
        }

        let deleted = sqlx::query("DELETE FROM nameindex WHERE block >= ?")
            .bind(height as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected();
        write_height(&mut tx, height.saturating_sub(1)).await?;

        tx.commit().await.map_err(storage)?;
        debug!(from = height, deleted, "index truncated");
        Ok(deleted)
    }

    async fn lookup(&self, name: &str) -> Result<Vec<NameRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block, name, txid FROM nameindex
             WHERE name = ? ORDER BY block, rowid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn record_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM nameindex")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        let cnt: i64 = row.try_get("cnt").map_err(storage)?;
        Ok(cnt as u64)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
