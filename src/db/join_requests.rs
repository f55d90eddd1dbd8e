use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    FromRow, Row,
};

use crate::domain::{JoinRequest, PendingJoinRequest};

const SELECT_PENDING: &str =
    r#"SELECT update_id, payload, due_at, auto_accept_at_due FROM join_requests"#;

/// Durable queue of deferred join requests, one row per (user, chat).
#[derive(Clone)]
pub struct JoinRequestRepository {
    pool: SqlitePool,
}

impl JoinRequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces the pending entry for the request's (user, chat).
    pub async fn upsert(&self, pending: &PendingJoinRequest) -> Result<()> {
        let payload = serde_json::to_string(&pending.request)?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO join_requests
                (user_id, chat_id, update_id, payload, due_at, auto_accept_at_due)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(pending.request.user.id)
        .bind(pending.request.chat_id)
        .bind(pending.update_id)
        .bind(payload)
        .bind(pending.due_at.timestamp())
        .bind(pending.auto_accept_at_due)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to persist join request of user {} for {}",
                pending.request.user.id, pending.request.chat_id
            )
        })?;
        Ok(())
    }

    /// Auto-accepted requests whose delay has elapsed.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PendingJoinRequest>> {
        let rows = sqlx::query_as::<_, PendingJoinRequest>(&format!(
            "{SELECT_PENDING} WHERE auto_accept_at_due = 1 AND due_at <= ?1 ORDER BY due_at"
        ))
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("failed to load due join requests")?;
        Ok(rows)
    }

    /// Requests recorded while auto-accept was off, regardless of due time.
    pub async fn awaiting_manual(&self) -> Result<Vec<PendingJoinRequest>> {
        let rows = sqlx::query_as::<_, PendingJoinRequest>(&format!(
            "{SELECT_PENDING} WHERE auto_accept_at_due = 0 ORDER BY due_at"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to load join requests awaiting approval")?;
        Ok(rows)
    }

    pub async fn count_awaiting_manual(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM join_requests WHERE auto_accept_at_due = 0"#)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get(&self, user_id: i64, chat_id: i64) -> Result<Option<PendingJoinRequest>> {
        let row = sqlx::query_as::<_, PendingJoinRequest>(&format!(
            "{SELECT_PENDING} WHERE user_id = ?1 AND chat_id = ?2"
        ))
        .bind(user_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Removes the entry the caller selected so it becomes its only resolver.
    /// Returns `false` when another path already claimed it or a repeat
    /// request replaced it in the meantime.
    pub async fn claim(&self, pending: &PendingJoinRequest) -> Result<bool> {
        let affected = sqlx::query(
            r#"DELETE FROM join_requests WHERE user_id = ?1 AND chat_id = ?2
                AND update_id = ?3 AND due_at = ?4 AND auto_accept_at_due = ?5"#,
        )
        .bind(pending.request.user.id)
        .bind(pending.request.chat_id)
        .bind(pending.update_id)
        .bind(pending.due_at.timestamp())
        .bind(pending.auto_accept_at_due)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Puts a claimed entry back after a failed resolution. A newer request
    /// stored for the same (user, chat) meanwhile wins.
    pub async fn restore(&self, pending: &PendingJoinRequest) -> Result<()> {
        let payload = serde_json::to_string(&pending.request)?;
        sqlx::query(
            r#"INSERT OR IGNORE INTO join_requests
                (user_id, chat_id, update_id, payload, due_at, auto_accept_at_due)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(pending.request.user.id)
        .bind(pending.request.chat_id)
        .bind(pending.update_id)
        .bind(payload)
        .bind(pending.due_at.timestamp())
        .bind(pending.auto_accept_at_due)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to restore join request of user {} for {}",
                pending.request.user.id, pending.request.chat_id
            )
        })?;
        Ok(())
    }
}

impl<'r> FromRow<'r, SqliteRow> for PendingJoinRequest {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let payload: String = row.try_get("payload")?;
        let request: JoinRequest =
            serde_json::from_str(&payload).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let due_at: i64 = row.try_get("due_at")?;
        Ok(Self {
            request,
            update_id: row.try_get("update_id")?,
            due_at: DateTime::from_timestamp(due_at, 0).unwrap_or_default(),
            auto_accept_at_due: row.try_get("auto_accept_at_due")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{domain::UserProfile, testing::temp_storage};

    fn pending(user_id: i64, due_at: DateTime<Utc>, auto: bool) -> PendingJoinRequest {
        PendingJoinRequest {
            request: JoinRequest {
                user: UserProfile {
                    id: user_id,
                    first_name: "U".into(),
                    ..Default::default()
                },
                chat_id: -100,
            },
            update_id: user_id * 10,
            due_at: DateTime::from_timestamp(due_at.timestamp(), 0).unwrap(),
            auto_accept_at_due: auto,
        }
    }

    #[tokio::test]
    async fn due_filters_by_time_and_flag() {
        let (_dir, storage) = temp_storage().await;
        let now = Utc::now();
        let repo = &storage.join_requests;
        repo.upsert(&pending(1, now - Duration::seconds(1), true)).await.unwrap();
        repo.upsert(&pending(2, now + Duration::seconds(60), true)).await.unwrap();
        repo.upsert(&pending(3, now - Duration::seconds(1), false)).await.unwrap();

        let due = repo.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].request.user.id, 1);
        assert_eq!(due[0].update_id, 10);

        let manual = repo.awaiting_manual().await.unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].request.user.id, 3);
        assert_eq!(repo.count_awaiting_manual().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claim_tolerates_already_deleted() {
        let (_dir, storage) = temp_storage().await;
        let repo = &storage.join_requests;
        let entry = pending(1, Utc::now(), true);
        repo.upsert(&entry).await.unwrap();
        assert!(repo.claim(&entry).await.unwrap());
        assert!(!repo.claim(&entry).await.unwrap());
        assert!(repo.get(1, -100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_an_entry_replaced_since_listing() {
        let (_dir, storage) = temp_storage().await;
        let repo = &storage.join_requests;
        let now = Utc::now();
        let manual = pending(1, now, false);
        repo.upsert(&manual).await.unwrap();
        let listed = repo.awaiting_manual().await.unwrap();

        let delayed = pending(1, now + Duration::seconds(600), true);
        repo.upsert(&delayed).await.unwrap();
        assert!(!repo.claim(&listed[0]).await.unwrap());
        assert_eq!(repo.get(1, -100).await.unwrap(), Some(delayed));
    }

    #[tokio::test]
    async fn restore_keeps_a_newer_entry() {
        let (_dir, storage) = temp_storage().await;
        let repo = &storage.join_requests;
        let now = Utc::now();
        let entry = pending(1, now, true);
        repo.upsert(&entry).await.unwrap();
        assert!(repo.claim(&entry).await.unwrap());
        repo.restore(&entry).await.unwrap();
        assert_eq!(repo.get(1, -100).await.unwrap(), Some(entry.clone()));

        assert!(repo.claim(&entry).await.unwrap());
        let newer = pending(1, now + Duration::seconds(30), false);
        repo.upsert(&newer).await.unwrap();
        repo.restore(&entry).await.unwrap();
        assert_eq!(repo.get(1, -100).await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn repeat_request_replaces_entry() {
        let (_dir, storage) = temp_storage().await;
        let repo = &storage.join_requests;
        let now = Utc::now();
        repo.upsert(&pending(1, now, false)).await.unwrap();
        repo.upsert(&pending(1, now + Duration::seconds(30), true)).await.unwrap();
        let stored = repo.get(1, -100).await.unwrap().unwrap();
        assert!(stored.auto_accept_at_due);
        assert_eq!(stored.due_at.timestamp(), (now + Duration::seconds(30)).timestamp());
        assert_eq!(repo.count_awaiting_manual().await.unwrap(), 0);
    }
}
