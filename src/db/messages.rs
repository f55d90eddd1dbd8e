use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::domain::{BroadcastJob, MessageRef, StoredMessage};

/// Message copied to a user once their join request is approved.
pub const KEY_JOIN_MESSAGE: &str = "request_message";
/// The pending "send to all" job.
pub const KEY_BROADCAST: &str = "message_all";
/// Mirror of the last broadcast, kept after delivery for statistics.
pub const KEY_LAST_BROADCAST: &str = "last_message_all";

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores `source` under `key`, replacing any previous pointer and its
    /// schedule.
    pub async fn save(&self, key: &str, source: MessageRef) -> Result<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO messages (key, chat_id, message_id, send_at)
                VALUES (?1, ?2, ?3, NULL)"#,
        )
        .bind(key)
        .bind(source.chat_id)
        .bind(source.message_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save message under {key}"))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<StoredMessage>> {
        let row: Option<(i64, i32, Option<i64>)> = sqlx::query_as(
            r#"SELECT chat_id, message_id, send_at FROM messages WHERE key = ?1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load message under {key}"))?;

        Ok(row.map(|(chat_id, message_id, send_at)| StoredMessage {
            source: MessageRef {
                chat_id,
                message_id,
            },
            send_at: send_at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }))
    }

    /// Returns whether a message existed under `key`.
    pub async fn schedule(&self, key: &str, at: DateTime<Utc>) -> Result<bool> {
        let affected = sqlx::query(r#"UPDATE messages SET send_at = ?1 WHERE key = ?2"#)
            .bind(at.timestamp())
            .bind(key)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn due_broadcast(&self, now: DateTime<Utc>) -> Result<Option<BroadcastJob>> {
        let row: Option<(i64, i32, i64)> = sqlx::query_as(
            r#"SELECT chat_id, message_id, send_at FROM messages
                WHERE key = ?1 AND message_id > 0 AND send_at > 0 AND send_at <= ?2"#,
        )
        .bind(KEY_BROADCAST)
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await
        .context("failed to query due broadcast")?;

        Ok(row.and_then(|(chat_id, message_id, send_at)| {
            Some(BroadcastJob {
                source: MessageRef {
                    chat_id,
                    message_id,
                },
                scheduled_at: DateTime::from_timestamp(send_at, 0)?,
            })
        }))
    }

    /// Removes the broadcast only if it still points at `job.source`, so a
    /// message stored mid-fan-out is not lost.
    pub async fn delete_job(&self, job: &BroadcastJob) -> Result<bool> {
        let affected = sqlx::query(
            r#"DELETE FROM messages WHERE key = ?1 AND chat_id = ?2 AND message_id = ?3"#,
        )
        .bind(KEY_BROADCAST)
        .bind(job.source.chat_id)
        .bind(job.source.message_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }
}
