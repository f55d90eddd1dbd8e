use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    FromRow, QueryBuilder, Row, Sqlite,
};

use crate::domain::{UserProfile, UserRecord};

// Keeps each IN (...) list well below SQLite's bound-parameter limit.
const UPDATE_CHUNK: usize = 500;

const SELECT_USER: &str = r#"SELECT id, first_name, last_name, username, channels, left_channels,
    last_message_id, created_at FROM users"#;

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the user on first sight, otherwise refreshes the profile.
    /// Either way `chat_id` ends up in the active channel set.
    pub async fn record_request(&self, profile: &UserProfile, chat_id: i64) -> Result<UserRecord> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, UserRecord>(&format!("{SELECT_USER} WHERE id = ?1"))
            .bind(profile.id)
            .fetch_optional(&mut *tx)
            .await?;

        let record = match existing {
            Some(mut record) => {
                record.first_name = profile.first_name.clone();
                record.last_name = profile.last_name.clone();
                record.username = profile.username.clone();
                record.channel_ids.insert(chat_id);
                record.left_channel_ids.remove(&chat_id);
                sqlx::query(
                    r#"UPDATE users SET first_name = ?1, last_name = ?2, username = ?3,
                        channels = ?4, left_channels = ?5 WHERE id = ?6"#,
                )
                .bind(&record.first_name)
                .bind(&record.last_name)
                .bind(&record.username)
                .bind(encode_set(&record.channel_ids)?)
                .bind(encode_set(&record.left_channel_ids)?)
                .bind(record.id)
                .execute(&mut *tx)
                .await?;
                record
            }
            None => {
                let record = UserRecord {
                    id: profile.id,
                    first_name: profile.first_name.clone(),
                    last_name: profile.last_name.clone(),
                    username: profile.username.clone(),
                    channel_ids: BTreeSet::from([chat_id]),
                    left_channel_ids: BTreeSet::new(),
                    last_delivered_message_id: None,
                    created_at: Utc::now(),
                };
                sqlx::query(
                    r#"INSERT INTO users (id, first_name, last_name, username, channels,
                        left_channels, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                )
                .bind(record.id)
                .bind(&record.first_name)
                .bind(&record.last_name)
                .bind(&record.username)
                .bind(encode_set(&record.channel_ids)?)
                .bind(encode_set(&record.left_channel_ids)?)
                .bind(record.created_at)
                .execute(&mut *tx)
                .await?;
                record
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!("{SELECT_USER} WHERE id = ?1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load user {user_id}"))?;
        Ok(record)
    }

    pub async fn all(&self) -> Result<Vec<UserRecord>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!("{SELECT_USER} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .context("failed to load users")?;
        Ok(records)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM users"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_delivered(&self, message_id: i32) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM users WHERE last_message_id = ?1"#)
                .bind(message_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Moves `departed` from the active set into the left set on the stored
    /// row, leaving channels added since the caller's read intact. Returns
    /// the updated record, or `None` when nothing changed.
    pub async fn record_departures(
        &self,
        user_id: i64,
        departed: &[i64],
    ) -> Result<Option<UserRecord>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) =
            sqlx::query_as::<_, UserRecord>(&format!("{SELECT_USER} WHERE id = ?1"))
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
        else {
            return Ok(None);
        };
        if !record.record_departures(departed) {
            return Ok(None);
        }

        sqlx::query(r#"UPDATE users SET channels = ?1, left_channels = ?2 WHERE id = ?3"#)
            .bind(encode_set(&record.channel_ids)?)
            .bind(encode_set(&record.left_channel_ids)?)
            .bind(record.id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to update channels of user {user_id}"))?;
        tx.commit().await?;
        Ok(Some(record))
    }

    /// Sets `last_message_id` for every listed user.
    pub async fn mark_delivered(&self, message_id: i32, user_ids: &[i64]) -> Result<u64> {
        let mut updated = 0;
        for chunk in user_ids.chunks(UPDATE_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("UPDATE users SET last_message_id = ");
            builder.push_bind(message_id);
            builder.push(" WHERE id IN (");
            let mut ids = builder.separated(", ");
            for id in chunk {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
            updated += builder
                .build()
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(updated)
    }
}

impl<'r> FromRow<'r, SqliteRow> for UserRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            username: row.try_get("username")?,
            channel_ids: decode_set(row.try_get("channels")?)?,
            left_channel_ids: decode_set(row.try_get("left_channels")?)?,
            last_delivered_message_id: row.try_get("last_message_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn encode_set(set: &BTreeSet<i64>) -> Result<String> {
    Ok(serde_json::to_string(set)?)
}

fn decode_set(raw: String) -> std::result::Result<BTreeSet<i64>, sqlx::Error> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    serde_json::from_str(&raw).map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::{domain::UserProfile, testing::temp_storage};

    fn profile(id: i64, name: &str) -> UserProfile {
        UserProfile {
            id,
            first_name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn repeat_requests_merge_channels() {
        let (_dir, storage) = temp_storage().await;
        storage.users.record_request(&profile(1, "Ann"), -100).await.unwrap();
        let record = storage
            .users
            .record_request(&profile(1, "Anna"), -200)
            .await
            .unwrap();
        assert_eq!(record.first_name, "Anna");
        assert_eq!(record.channel_ids.len(), 2);

        let stored = storage.users.get(1).await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(storage.users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejoining_clears_left_marker() {
        let (_dir, storage) = temp_storage().await;
        storage.users.record_request(&profile(1, "Ann"), -100).await.unwrap();
        storage.users.record_departures(1, &[-100]).await.unwrap();

        let record = storage.users.record_request(&profile(1, "Ann"), -100).await.unwrap();
        assert!(record.channel_ids.contains(&-100));
        assert!(record.left_channel_ids.is_empty());
    }

    #[tokio::test]
    async fn departures_keep_channels_joined_after_the_read() {
        let (_dir, storage) = temp_storage().await;
        storage.users.record_request(&profile(2, "Bo"), -100).await.unwrap();
        storage.users.record_request(&profile(2, "Bo"), -300).await.unwrap();

        let record = storage
            .users
            .record_departures(2, &[-100])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.channel_ids, BTreeSet::from([-300]));
        assert_eq!(record.left_channel_ids, BTreeSet::from([-100]));
        assert!(storage.users.record_departures(2, &[-100]).await.unwrap().is_none());
        assert!(storage.users.record_departures(99, &[-100]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_delivered_updates_listed_users_only() {
        let (_dir, storage) = temp_storage().await;
        for id in 1..=3 {
            storage.users.record_request(&profile(id, "U"), -100).await.unwrap();
        }
        let updated = storage.users.mark_delivered(42, &[1, 3]).await.unwrap();
        assert_eq!(updated, 2);
        assert_eq!(storage.users.count_delivered(42).await.unwrap(), 2);
        assert_eq!(
            storage.users.get(2).await.unwrap().unwrap().last_delivered_message_id,
            None
        );
        assert_eq!(storage.users.mark_delivered(42, &[]).await.unwrap(), 0);
    }
}
