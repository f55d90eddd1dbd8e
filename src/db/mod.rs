use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

pub mod delays;
pub mod join_requests;
pub mod messages;
pub mod users;

use delays::DelayRepository;
use join_requests::JoinRequestRepository;
use messages::MessageRepository;
use users::UserRepository;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        username TEXT NOT NULL DEFAULT '',
        channels TEXT NOT NULL DEFAULT '[]',
        left_channels TEXT NOT NULL DEFAULT '[]',
        last_message_id INTEGER,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        key TEXT PRIMARY KEY,
        chat_id INTEGER NOT NULL,
        message_id INTEGER NOT NULL,
        send_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delays (
        key TEXT PRIMARY KEY,
        seconds INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS join_requests (
        user_id INTEGER NOT NULL,
        chat_id INTEGER NOT NULL,
        update_id INTEGER NOT NULL,
        payload TEXT NOT NULL,
        due_at INTEGER NOT NULL,
        auto_accept_at_due INTEGER NOT NULL,
        PRIMARY KEY (user_id, chat_id)
    )
    "#,
];

/// All repositories over one SQLite pool.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    pub users: UserRepository,
    pub messages: MessageRepository,
    pub delays: DelayRepository,
    pub join_requests: JoinRequestRepository,
}

impl Storage {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = init_pool(db_path).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            messages: MessageRepository::new(pool.clone()),
            delays: DelayRepository::new(pool.clone()),
            join_requests: JoinRequestRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}
