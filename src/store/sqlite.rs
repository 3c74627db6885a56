// src/store/sqlite.rs
//! SQLite-backed `StateStore`.
//!
//! Table layout stays compatible with databases created by earlier releases
//! (`seen(video_id)`, `state(id, last_run)`); missing columns are added on open.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{Backlog, LedgerEntry, PendingRetry, Result, StateStore};
use crate::error::StorageError;
use crate::ingest::types::CandidateItem;

const CREATE_SEEN_TABLE: &str = "CREATE TABLE IF NOT EXISTS seen (
    video_id TEXT PRIMARY KEY,
    published_at INTEGER,
    announced_at INTEGER
)";

const CREATE_STATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS state (id INTEGER PRIMARY KEY, last_run TEXT)";

const CREATE_LEDGER_TABLE: &str = "CREATE TABLE IF NOT EXISTS retry_ledger (
    video_id TEXT PRIMARY KEY,
    item TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT NOT NULL,
    first_failed_at INTEGER NOT NULL,
    last_failed_at INTEGER NOT NULL,
    abandoned INTEGER NOT NULL DEFAULT 0
)";

const CREATE_BACKLOG_TABLE: &str = "CREATE TABLE IF NOT EXISTS backlog (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    published_after INTEGER NOT NULL,
    published_before INTEGER NOT NULL
)";

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database at `path` and bring the schema
    /// up to date. Pair with [`SqliteStateStore::close`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        // Single writer; one connection keeps every statement serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SEEN_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_STATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_LEDGER_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_BACKLOG_TABLE).execute(&self.pool).await?;

        let columns: Vec<String> = sqlx::query("PRAGMA table_info(seen)")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()?;
        for col in ["published_at", "announced_at"] {
            if !columns.iter().any(|c| c == col) {
                tracing::info!(column = col, "upgrading legacy seen table");
                sqlx::query(&format!("ALTER TABLE seen ADD COLUMN {col} INTEGER"))
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Flush and release the connection pool.
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn seen_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM seen")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(StorageError::CorruptBacklog(secs))
}

fn parse_watermark(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::CorruptWatermark(raw.to_string()))
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn stored_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_run FROM state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let raw: Option<String> = match row {
            Some(row) => row.try_get("last_run")?,
            None => None,
        };
        match raw.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => parse_watermark(s).map(Some),
            _ => Ok(None),
        }
    }

    async fn set_watermark(&self, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO state (id, last_run) VALUES (1, ?)
             ON CONFLICT(id) DO UPDATE SET last_run = excluded.last_run",
        )
        .bind(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_seen(&self, video_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM seen WHERE video_id = ?")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_seen(
        &self,
        video_id: &str,
        published_at: DateTime<Utc>,
        announced_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO seen (video_id, published_at, announced_at) VALUES (?, ?, ?)
             ON CONFLICT(video_id) DO NOTHING",
        )
        .bind(video_id)
        .bind(published_at.timestamp())
        .bind(announced_at.timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM retry_ledger WHERE video_id = ?")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &CandidateItem,
        reason: &str,
        max_attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let payload = serde_json::to_string(item)?;
        let max_attempts = i64::from(max_attempts.max(1));
        let abandoned_on_first = i64::from(max_attempts <= 1);
        let row = sqlx::query(
            "INSERT INTO retry_ledger
                (video_id, item, attempts, last_error, first_failed_at, last_failed_at, abandoned)
             VALUES (?, ?, 1, ?, ?, ?, ?)
             ON CONFLICT(video_id) DO UPDATE SET
                item = excluded.item,
                attempts = retry_ledger.attempts + 1,
                last_error = excluded.last_error,
                last_failed_at = excluded.last_failed_at,
                abandoned = CASE WHEN retry_ledger.attempts + 1 >= ? THEN 1 ELSE 0 END
             RETURNING attempts, abandoned",
        )
        .bind(&item.video_id)
        .bind(payload)
        .bind(reason)
        .bind(failed_at.timestamp())
        .bind(failed_at.timestamp())
        .bind(abandoned_on_first)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        let attempts: i64 = row.try_get("attempts")?;
        let abandoned: i64 = row.try_get("abandoned")?;
        Ok(LedgerEntry {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            abandoned: abandoned != 0,
        })
    }

    async fn pending_retries(&self, limit: u32) -> Result<Vec<PendingRetry>> {
        let rows = sqlx::query(
            "SELECT item, attempts, last_error FROM retry_ledger
             WHERE abandoned = 0
             ORDER BY first_failed_at ASC, video_id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("item")?;
            let attempts: i64 = row.try_get("attempts")?;
            out.push(PendingRetry {
                item: serde_json::from_str(&payload)?,
                attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                last_error: row.try_get("last_error")?,
            });
        }
        Ok(out)
    }

    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM seen WHERE published_at IS NOT NULL AND published_at < ?")
            .bind(before.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn prune_ledger(&self, before: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM retry_ledger WHERE abandoned = 1 AND last_failed_at < ?")
            .bind(before.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn backlog(&self) -> Result<Option<Backlog>> {
        let row = sqlx::query("SELECT published_after, published_before FROM backlog WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Backlog {
            published_after: from_unix(row.try_get("published_after")?)?,
            published_before: from_unix(row.try_get("published_before")?)?,
        }))
    }

    async fn set_backlog(&self, backlog: Option<Backlog>) -> Result<()> {
        match backlog {
            Some(b) => {
                sqlx::query(
                    "INSERT INTO backlog (id, published_after, published_before) VALUES (1, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                        published_after = excluded.published_after,
                        published_before = excluded.published_before",
                )
                .bind(b.published_after.timestamp())
                .bind(b.published_before.timestamp())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM backlog").execute(&self.pool).await?;
            }
        }
        Ok(())
    }
}
