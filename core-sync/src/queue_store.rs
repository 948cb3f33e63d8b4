//! # Queue Store
//!
//! Crash-durable, encrypted persistence for pending uploads.
//!
//! ## Overview
//!
//! Each `QueueItem` is serialized to JSON, sealed with the record key and
//! stored as one row of a SQLite table running in WAL mode with
//! `synchronous = FULL`, so a committed insert survives power loss.
//!
//! The store performs no recovery on open: every row it holds is pending by
//! definition. Two failure modes are handled without taking the host down:
//!
//! - **Corrupted database file**: the file is renamed aside with a
//!   `.corrupt-<millis>` suffix, a fresh empty store is created and a
//!   `QueueEvent::DataLoss` is published.
//! - **Unreadable record**: a row that fails to decrypt or decode is deleted
//!   and reported the same way; the remaining rows stay available.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{QueueStore, SqliteQueueStore, RecordKey};
//!
//! let key = RecordKey::load_or_create(secure_store.as_ref(), "upload_queue_record_key").await?;
//! let store = SqliteQueueStore::open(&db_path, &key, Some(event_bus.clone())).await?;
//!
//! store.add(&item).await?;
//! for pending in store.list().await? {
//!     // FIFO by created_at
//! }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, instrument, warn};

use crate::encryption::{RecordCipher, RecordKey};
use crate::error::{Result, SyncError};
use crate::item::{QueueItem, QueueItemId};

// SQLite primary result codes for a damaged file.
const SQLITE_CORRUPT: i64 = 11;
const SQLITE_NOTADB: i64 = 26;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS upload_queue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        payload BLOB NOT NULL
    )
"#;

/// Persistent store of pending uploads.
///
/// Only enqueue and the sync engine mutate it; everything else reads
/// snapshots.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new item. Fails if the id is already present.
    async fn add(&self, item: &QueueItem) -> Result<()>;

    /// All pending items, oldest first (ties by insertion order).
    async fn list(&self) -> Result<Vec<QueueItem>>;

    async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// Replace the stored item. Returns `false` if it no longer exists.
    async fn update(&self, item: &QueueItem) -> Result<bool>;

    /// Returns `false` if the item was already gone.
    async fn remove(&self, id: &QueueItemId) -> Result<bool>;

    async fn count(&self) -> Result<u64>;
}

/// SQLite implementation of [`QueueStore`].
pub struct SqliteQueueStore {
    pool: SqlitePool,
    cipher: RecordCipher,
    events: Option<EventBus>,
}

impl SqliteQueueStore {
    /// Open (or create) the store at `path`.
    ///
    /// A file SQLite reports as corrupt is isolated and replaced with an
    /// empty store; any other failure is returned.
    #[instrument(skip_all)]
    pub async fn open(path: &Path, key: &RecordKey, events: Option<EventBus>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Io(e.to_string()))?;
        }

        let pool = match Self::connect_file(path).await {
            Ok(pool) => pool,
            Err(e) if is_corruption(&e) => {
                let isolated = isolate_corrupt_file(path).await?;
                error!(
                    error = %e,
                    isolated = %isolated.display(),
                    "Queue database corrupted; pending uploads lost, starting empty"
                );
                publish(
                    &events,
                    QueueEvent::DataLoss {
                        records_lost: None,
                        isolated_path: Some(isolated.to_string_lossy().into_owned()),
                        reason: e.to_string(),
                    },
                );
                Self::connect_file(path)
                    .await
                    .map_err(|e| SyncError::Database(e.to_string()))?
            }
            Err(e) => return Err(SyncError::Database(e.to_string())),
        };

        info!("Upload queue store opened");
        Ok(Self {
            pool,
            cipher: RecordCipher::new(key),
            events,
        })
    }

    /// Open a private in-memory store (tests and ephemeral hosts).
    pub async fn open_in_memory(key: &RecordKey, events: Option<EventBus>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SyncError::Database(e.to_string()))?;

        // Every in-memory connection is its own database, so pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        init_schema(&pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(Self {
            pool,
            cipher: RecordCipher::new(key),
            events,
        })
    }

    async fn connect_file(path: &Path) -> std::result::Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        init_schema(&pool).await?;

        let check: String = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_one(&pool)
            .await?;
        if check != "ok" {
            pool.close().await;
            return Err(sqlx::Error::Protocol(format!(
                "database disk image is malformed: {}",
                check
            )));
        }

        Ok(pool)
    }

    /// Close the underlying pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn encode(&self, item: &QueueItem) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(item).map_err(|e| SyncError::Validation(e.to_string()))?;
        self.cipher.seal(&item.id.to_string(), &json)
    }

    fn decode(&self, id: &str, payload: &[u8]) -> Result<QueueItem> {
        let json = self.cipher.open(id, payload)?;
        let item: QueueItem =
            serde_json::from_slice(&json).map_err(|e| SyncError::Validation(e.to_string()))?;
        if item.id.to_string() != id {
            return Err(SyncError::Validation(format!(
                "record {} decoded to item {}",
                id, item.id
            )));
        }
        Ok(item)
    }

    /// Delete rows that could not be read back and report the loss.
    async fn drop_unreadable(&self, unreadable: Vec<(String, SyncError)>) -> Result<()> {
        if unreadable.is_empty() {
            return Ok(());
        }

        for (id, cause) in &unreadable {
            error!(queue_item_id = %id, error = %cause, "Dropping unreadable queue record");
            sqlx::query("DELETE FROM upload_queue WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
        }

        publish(
            &self.events,
            QueueEvent::DataLoss {
                records_lost: Some(unreadable.len() as u64),
                isolated_path: None,
                reason: unreadable[0].1.to_string(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn add(&self, item: &QueueItem) -> Result<()> {
        let payload = self.encode(item)?;

        sqlx::query("INSERT INTO upload_queue (id, created_at, payload) VALUES (?, ?, ?)")
            .bind(item.id.to_string())
            .bind(item.created_at.timestamp_millis())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        debug!(queue_item_id = %item.id, "Queue record added");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query("SELECT id, payload FROM upload_queue ORDER BY created_at ASC, seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let mut items = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            let payload: Vec<u8> = row.get("payload");
            match self.decode(&id, &payload) {
                Ok(item) => items.push(item),
                Err(e) => unreadable.push((id, e)),
            }
        }

        self.drop_unreadable(unreadable).await?;
        Ok(items)
    }

    async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        let id = id.to_string();
        let row = sqlx::query("SELECT payload FROM upload_queue WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Vec<u8> = row.get("payload");
        match self.decode(&id, &payload) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                self.drop_unreadable(vec![(id, e)]).await?;
                Ok(None)
            }
        }
    }

    async fn update(&self, item: &QueueItem) -> Result<bool> {
        let payload = self.encode(item)?;

        let result = sqlx::query("UPDATE upload_queue SET payload = ? WHERE id = ?")
            .bind(payload)
            .bind(item.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            warn!(queue_item_id = %item.id, "Update skipped: item no longer queued");
            return Ok(false);
        }
        Ok(true)
    }

    async fn remove(&self, id: &QueueItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM upload_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM upload_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count.max(0) as u64)
    }
}

async fn init_schema(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(SCHEMA).execute(pool).await?;
    Ok(())
}

fn is_corruption(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let code_matches = db
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB))
                .unwrap_or(false);
            code_matches || mentions_corruption(db.message())
        }
        sqlx::Error::Protocol(msg) => mentions_corruption(msg),
        _ => false,
    }
}

fn mentions_corruption(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("malformed") || message.contains("not a database")
}

/// Move the damaged file (and its WAL sidecars) out of the way.
async fn isolate_corrupt_file(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload_queue.db".to_string());
    let isolated = path.with_file_name(format!(
        "{}.corrupt-{}",
        file_name,
        Utc::now().timestamp_millis()
    ));

    tokio::fs::rename(path, &isolated)
        .await
        .map_err(|e| SyncError::StoreCorrupted(format!("could not isolate damaged store: {}", e)))?;

    for suffix in ["-wal", "-shm"] {
        let sidecar = path.with_file_name(format!("{}{}", file_name, suffix));
        if let Err(e) = tokio::fs::remove_file(&sidecar).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove stale WAL sidecar");
            }
        }
    }

    Ok(isolated)
}

fn publish(events: &Option<EventBus>, event: QueueEvent) {
    if let Some(bus) = events {
        let _ = bus.emit(CoreEvent::Queue(event));
    }
}

// ============================================================================
// Tests
// ============================================================================
