//! Idempotency store: deduplicates events by `event_id`.
//!
//! Backed by the `seen_events` SQLite table. The bus consults the store
//! before dispatching any event; a previously seen `event_id` becomes a
//! logged no-op. Records are swept by a TTL job (default 30 days).

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::timeutil;

/// SQLite-backed `seen_events` table.
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    db: SqlitePool,
}

impl IdempotencyStore {
    /// Create the store, running table setup.
    ///
    /// # Errors
    ///
    /// Returns a database error if the table cannot be created.
    pub async fn new(db: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS seen_events (
                event_id TEXT PRIMARY KEY,
                first_seen_ts TEXT NOT NULL,
                last_seen_ts TEXT NOT NULL
            )",
        )
        .execute(&db)
        .await?;
        Ok(Self { db })
    }

    /// Record an event ID, returning `true` if it was new.
    ///
    /// Re-deliveries update `last_seen_ts` so the sweep keeps hot entries.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub async fn check_and_record(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let now = timeutil::format_utc(Utc::now());
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO seen_events (event_id, first_seen_ts, last_seen_ts) \
             VALUES (?1, ?2, ?2)",
        )
        .bind(event_id)
        .bind(&now)
        .execute(&self.db)
        .await?
        .rows_affected();

        if inserted == 0 {
            sqlx::query("UPDATE seen_events SET last_seen_ts = ?1 WHERE event_id = ?2")
                .bind(&now)
                .bind(event_id)
                .execute(&self.db)
                .await?;
            debug!(event_id, "duplicate event deduped");
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether an event ID has been seen before (read-only).
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn seen(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM seen_events WHERE event_id = ?1")
                .bind(event_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.is_some())
    }

    /// Delete records not seen within `ttl_days`. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns a database error on delete failure.
    pub async fn sweep(&self, ttl_days: i64) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::days(ttl_days))
            .unwrap_or_else(Utc::now);
        let cutoff = timeutil::format_utc(cutoff);
        let result = sqlx::query("DELETE FROM seen_events WHERE last_seen_ts < ?1")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of stored event IDs.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn len(&self) -> Result<u64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM seen_events")
            .fetch_one(&self.db)
            .await?;
        Ok(row.0.cast_unsigned())
    }
}
