//! Durable local store for the offline submission queue.
//!
//! A key-value store keyed by `local_id`, with lookups by synced flag and by
//! creation time. [`SqliteQueueStore`] is the durable implementation;
//! [`MemoryQueueStore`] backs tests and ephemeral clients.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::RwLock;

use crate::error::{Result, TidewatchError};
use crate::models::QueueEntry;

/// Outcome of flipping an entry's synced flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadySynced,
    NotFound,
}

/// Storage operations needed by the submission queue.
///
/// Listing operations return entries in insertion order.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new entry. Fails if the local id already exists.
    async fn add(&self, entry: &QueueEntry) -> Result<()>;

    async fn get(&self, local_id: &str) -> Result<Option<QueueEntry>>;

    /// Insert or replace an entry, keeping its original position.
    async fn put(&self, entry: &QueueEntry) -> Result<()>;

    async fn delete(&self, local_id: &str) -> Result<bool>;

    async fn list_by_synced(&self, synced: bool) -> Result<Vec<QueueEntry>>;

    /// Entries with `from <= created_at < to`.
    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>>;

    async fn list_all(&self) -> Result<Vec<QueueEntry>>;

    /// Atomically set `synced = true`.
    async fn mark_synced(&self, local_id: &str) -> Result<MarkOutcome>;

    /// Remove every synced entry, returning how many were removed.
    async fn delete_synced(&self) -> Result<u64>;
}

/// Schema for the queue table.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    local_id TEXT NOT NULL UNIQUE,
    payload TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_entries_synced ON queue_entries(synced);
CREATE INDEX IF NOT EXISTS idx_queue_entries_created_at ON queue_entries(created_at);
"#;

/// Fixed-width timestamps so text comparison matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> TidewatchError {
    TidewatchError::Storage(format!("{}: {}", context, e))
}

/// SQLite-backed queue store.
#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Open (or create) the queue database at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| storage_err("Failed to create queue directory", e))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| storage_err("Failed to open queue database", e))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| storage_err("Failed to create in-memory queue", e))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to initialize schema", e))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_err("Health check failed", e))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_entry(row: &SqliteRow) -> Result<QueueEntry> {
        let local_id: String = row
            .try_get("local_id")
            .map_err(|e| storage_err("Bad local_id column", e))?;
        let payload: String = row
            .try_get("payload")
            .map_err(|e| storage_err("Bad payload column", e))?;
        let synced: i64 = row
            .try_get("synced")
            .map_err(|e| storage_err("Bad synced column", e))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| storage_err("Bad created_at column", e))?;

        Ok(QueueEntry {
            payload: serde_json::from_str(&payload)
                .map_err(|e| storage_err(&format!("Corrupt payload for {}", local_id), e))?,
            synced: synced != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| storage_err(&format!("Corrupt timestamp for {}", local_id), e))?
                .with_timezone(&Utc),
            local_id,
        })
    }

    fn rows_to_entries(rows: &[SqliteRow]) -> Result<Vec<QueueEntry>> {
        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn add(&self, entry: &QueueEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;

        sqlx::query(
            "INSERT INTO queue_entries (local_id, payload, synced, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.local_id)
        .bind(payload)
        .bind(entry.synced as i64)
        .bind(format_timestamp(&entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to add queue entry", e))?;

        Ok(())
    }

    async fn get(&self, local_id: &str) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(
            "SELECT local_id, payload, synced, created_at FROM queue_entries WHERE local_id = ?",
        )
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to get queue entry", e))?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn put(&self, entry: &QueueEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;

        sqlx::query(
            "INSERT INTO queue_entries (local_id, payload, synced, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(local_id) DO UPDATE SET
                payload = excluded.payload,
                synced = excluded.synced,
                created_at = excluded.created_at",
        )
        .bind(&entry.local_id)
        .bind(payload)
        .bind(entry.synced as i64)
        .bind(format_timestamp(&entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to put queue entry", e))?;

        Ok(())
    }

    async fn delete(&self, local_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE local_id = ?")
            .bind(local_id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to delete queue entry", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_synced(&self, synced: bool) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            "SELECT local_id, payload, synced, created_at FROM queue_entries
             WHERE synced = ? ORDER BY seq",
        )
        .bind(synced as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list queue entries", e))?;

        Self::rows_to_entries(&rows)
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            "SELECT local_id, payload, synced, created_at FROM queue_entries
             WHERE created_at >= ? AND created_at < ? ORDER BY seq",
        )
        .bind(format_timestamp(&from))
        .bind(format_timestamp(&to))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list queue entries by time", e))?;

        Self::rows_to_entries(&rows)
    }

    async fn list_all(&self) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            "SELECT local_id, payload, synced, created_at FROM queue_entries ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list queue entries", e))?;

        Self::rows_to_entries(&rows)
    }

    async fn mark_synced(&self, local_id: &str) -> Result<MarkOutcome> {
        let result =
            sqlx::query("UPDATE queue_entries SET synced = 1 WHERE local_id = ? AND synced = 0")
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_err("Failed to mark entry synced", e))?;

        if result.rows_affected() > 0 {
            return Ok(MarkOutcome::Marked);
        }

        let exists = sqlx::query("SELECT 1 FROM queue_entries WHERE local_id = ?")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to look up queue entry", e))?;

        Ok(if exists.is_some() {
            MarkOutcome::AlreadySynced
        } else {
            MarkOutcome::NotFound
        })
    }

    async fn delete_synced(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE synced = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to purge synced entries", e))?;

        Ok(result.rows_affected())
    }
}

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    entries: BTreeMap<u64, QueueEntry>,
    index: HashMap<String, u64>,
}

impl MemoryState {
    fn filtered(&self, keep: impl Fn(&QueueEntry) -> bool) -> Vec<QueueEntry> {
        self.entries.values().filter(|e| keep(e)).cloned().collect()
    }
}

/// In-memory queue store.
#[derive(Default)]
pub struct MemoryQueueStore {
    state: RwLock<MemoryState>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn add(&self, entry: &QueueEntry) -> Result<()> {
        let mut state = self.state.write().await;
        if state.index.contains_key(&entry.local_id) {
            return Err(TidewatchError::Storage(format!(
                "duplicate local id {}",
                entry.local_id
            )));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.index.insert(entry.local_id.clone(), seq);
        state.entries.insert(seq, entry.clone());
        Ok(())
    }

    async fn get(&self, local_id: &str) -> Result<Option<QueueEntry>> {
        let state = self.state.read().await;
        Ok(state
            .index
            .get(local_id)
            .and_then(|seq| state.entries.get(seq))
            .cloned())
    }

    async fn put(&self, entry: &QueueEntry) -> Result<()> {
        let mut state = self.state.write().await;
        match state.index.get(&entry.local_id).copied() {
            Some(seq) => {
                state.entries.insert(seq, entry.clone());
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.index.insert(entry.local_id.clone(), seq);
                state.entries.insert(seq, entry.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, local_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.index.remove(local_id) {
            Some(seq) => Ok(state.entries.remove(&seq).is_some()),
            None => Ok(false),
        }
    }

    async fn list_by_synced(&self, synced: bool) -> Result<Vec<QueueEntry>> {
        Ok(self.state.read().await.filtered(|e| e.synced == synced))
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        Ok(self
            .state
            .read()
            .await
            .filtered(|e| e.created_at >= from && e.created_at < to))
    }

    async fn list_all(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.state.read().await.filtered(|_| true))
    }

    async fn mark_synced(&self, local_id: &str) -> Result<MarkOutcome> {
        let mut state = self.state.write().await;
        let Some(seq) = state.index.get(local_id).copied() else {
            return Ok(MarkOutcome::NotFound);
        };
        match state.entries.get_mut(&seq) {
            Some(entry) if entry.synced => Ok(MarkOutcome::AlreadySynced),
            Some(entry) => {
                entry.synced = true;
                Ok(MarkOutcome::Marked)
            }
            None => Ok(MarkOutcome::NotFound),
        }
    }

    async fn delete_synced(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let synced: Vec<(u64, String)> = state
            .entries
            .iter()
            .filter(|(_, e)| e.synced)
            .map(|(seq, e)| (*seq, e.local_id.clone()))
            .collect();
        for (seq, local_id) in &synced {
            state.entries.remove(seq);
            state.index.remove(local_id);
        }
        Ok(synced.len() as u64)
    }
}
