//! Session persistence: conversation history and pending-confirmation state.
//!
//! Two SQLite tables back every conversation:
//!
//! ```text
//! conversations(session_id, turn_idx, role, content, ts)
//! session_state(session_id PK, pending_confirmation, pending_plan_json,
//!               confirmation_question, updated_at)
//! ```
//!
//! Reads go directly through the pool; writes use direct queries since
//! session operations are low-frequency. Old sessions are swept by idle TTL
//! and an LRU cap on the number of retained sessions.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::providers::{ChatMessage, ChatRole};
use crate::timeutil;
use crate::tools::ToolCall;

/// A pending confirmation saved across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    /// The plan awaiting approval.
    pub plan: Vec<ToolCall>,
    /// The question last shown to the user.
    pub question: String,
}

/// SQLite-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: SqlitePool,
}

impl SessionStore {
    /// Create the store, running table setup.
    ///
    /// # Errors
    ///
    /// Returns a database error if the tables cannot be created.
    pub async fn new(db: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                session_id TEXT NOT NULL,
                turn_idx INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                ts TEXT NOT NULL,
                PRIMARY KEY (session_id, turn_idx)
            )",
        )
        .execute(&db)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_state (
                session_id TEXT PRIMARY KEY,
                pending_confirmation INTEGER NOT NULL DEFAULT 0,
                pending_plan_json TEXT NOT NULL DEFAULT '[]',
                confirmation_question TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&db)
        .await?;
        Ok(Self { db })
    }

    /// Load the last `max_messages` turns, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn load_history(
        &self,
        session_id: &str,
        max_messages: usize,
    ) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let limit = i64::try_from(max_messages).unwrap_or(i64::MAX);
        let mut rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT role, content FROM conversations \
             WHERE session_id = ?1 \
             ORDER BY turn_idx DESC \
             LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.reverse();

        Ok(rows
            .into_iter()
            .map(|(role, content)| ChatMessage {
                role: match role.as_str() {
                    "assistant" => ChatRole::Assistant,
                    _ => ChatRole::User,
                },
                content,
            })
            .collect())
    }

    /// Append one turn, assigning the next `turn_idx`.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub async fn append_turn(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO conversations (session_id, turn_idx, role, content, ts) \
             VALUES (?1, \
                     COALESCE((SELECT MAX(turn_idx) FROM conversations WHERE session_id = ?1), -1) + 1, \
                     ?2, ?3, ?4)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(timeutil::format_utc(Utc::now()))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Trim a session's history to the newest `max_messages` turns.
    ///
    /// # Errors
    ///
    /// Returns a database error on delete failure.
    pub async fn prune_history(
        &self,
        session_id: &str,
        max_messages: usize,
    ) -> Result<u64, sqlx::Error> {
        let keep = i64::try_from(max_messages).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "DELETE FROM conversations \
             WHERE session_id = ?1 AND turn_idx NOT IN ( \
                 SELECT turn_idx FROM conversations \
                 WHERE session_id = ?1 \
                 ORDER BY turn_idx DESC LIMIT ?2)",
        )
        .bind(session_id)
        .bind(keep)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Load the pending confirmation for a session, if any.
    ///
    /// A row whose plan fails to parse is dropped with a warning — a
    /// corrupted pending plan must not wedge the session.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn load_pending(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingConfirmation>, sqlx::Error> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT pending_confirmation, pending_plan_json, confirmation_question \
             FROM session_state WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        let Some((pending, plan_json, question)) = row else {
            return Ok(None);
        };
        if pending == 0 {
            return Ok(None);
        }

        match serde_json::from_str::<Vec<ToolCall>>(&plan_json) {
            Ok(plan) if !plan.is_empty() => Ok(Some(PendingConfirmation { plan, question })),
            Ok(_) => {
                // Invariant: pending_confirmation implies a non-empty plan.
                warn!(session_id, "pending confirmation with empty plan, clearing");
                self.clear_pending(session_id).await?;
                Ok(None)
            }
            Err(e) => {
                warn!(session_id, error = %e, "unparseable pending plan, clearing");
                self.clear_pending(session_id).await?;
                Ok(None)
            }
        }
    }

    /// Upsert the pending confirmation row for a session.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub async fn save_pending(
        &self,
        session_id: &str,
        plan: &[ToolCall],
        question: &str,
    ) -> Result<(), sqlx::Error> {
        let plan_json = serde_json::to_string(plan).unwrap_or_else(|_| "[]".to_owned());
        sqlx::query(
            "INSERT INTO session_state \
                 (session_id, pending_confirmation, pending_plan_json, confirmation_question, updated_at) \
             VALUES (?1, 1, ?2, ?3, ?4) \
             ON CONFLICT(session_id) DO UPDATE SET \
                 pending_confirmation = 1, \
                 pending_plan_json = excluded.pending_plan_json, \
                 confirmation_question = excluded.confirmation_question, \
                 updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(&plan_json)
        .bind(question)
        .bind(timeutil::format_utc(Utc::now()))
        .execute(&self.db)
        .await?;
        debug!(session_id, steps = plan.len(), "pending confirmation saved");
        Ok(())
    }

    /// Delete the pending confirmation row for a session.
    ///
    /// # Errors
    ///
    /// Returns a database error on delete failure.
    pub async fn clear_pending(&self, session_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM session_state WHERE session_id = ?1")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Evict idle sessions past the TTL and enforce the LRU cap.
    ///
    /// Returns `(ttl_evicted, lru_evicted)` session counts.
    ///
    /// # Errors
    ///
    /// Returns a database error on delete failure.
    pub async fn sweep(
        &self,
        ttl_secs: u64,
        max_sessions: usize,
    ) -> Result<(u64, u64), sqlx::Error> {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ChronoDuration::seconds(ttl))
            .unwrap_or_else(Utc::now);
        let cutoff = timeutil::format_utc(cutoff);

        let ttl_evicted = sqlx::query(
            "DELETE FROM conversations WHERE session_id IN ( \
                 SELECT session_id FROM conversations \
                 GROUP BY session_id HAVING MAX(ts) < ?1)",
        )
        .bind(&cutoff)
        .execute(&self.db)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM session_state WHERE updated_at < ?1")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;

        let cap = i64::try_from(max_sessions).unwrap_or(i64::MAX);
        let lru_evicted = sqlx::query(
            "DELETE FROM conversations WHERE session_id NOT IN ( \
                 SELECT session_id FROM conversations \
                 GROUP BY session_id \
                 ORDER BY MAX(ts) DESC LIMIT ?1)",
        )
        .bind(cap)
        .execute(&self.db)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM session_state WHERE session_id NOT IN ( \
                 SELECT session_id FROM session_state \
                 ORDER BY updated_at DESC LIMIT ?1)",
        )
        .bind(cap)
        .execute(&self.db)
        .await?;

        if ttl_evicted > 0 || lru_evicted > 0 {
            info!(ttl_evicted, lru_evicted, "session sweep complete");
        }
        Ok((ttl_evicted, lru_evicted))
    }

    /// Number of distinct sessions with stored turns.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn session_count(&self) -> Result<u64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT session_id) FROM conversations")
                .fetch_one(&self.db)
                .await?;
        Ok(row.0.cast_unsigned())
    }
}
