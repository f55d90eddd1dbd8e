use anyhow::Result;
use sqlx::sqlite::SqlitePool;

pub const KEY_JOIN_DELAY: &str = "delay_request_to_join";

#[derive(Clone)]
pub struct DelayRepository {
    pool: SqlitePool,
}

impl DelayRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored delay in seconds, `0` when never set.
    pub async fn get(&self, key: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(r#"SELECT seconds FROM delays WHERE key = ?1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(seconds,)| seconds).unwrap_or(0))
    }

    pub async fn set(&self, key: &str, seconds: i64) -> Result<()> {
        sqlx::query(r#"INSERT OR REPLACE INTO delays (key, seconds) VALUES (?1, ?2)"#)
            .bind(key)
            .bind(seconds)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_storage;

    #[tokio::test]
    async fn delay_defaults_to_zero_and_overwrites() {
        let (_dir, storage) = temp_storage().await;
        assert_eq!(storage.delays.get(KEY_JOIN_DELAY).await.unwrap(), 0);
        storage.delays.set(KEY_JOIN_DELAY, 300).await.unwrap();
        storage.delays.set(KEY_JOIN_DELAY, 60).await.unwrap();
        assert_eq!(storage.delays.get(KEY_JOIN_DELAY).await.unwrap(), 60);
    }
}
