use anyhow::Result;
use async_trait::async_trait;

use crate::domain::MessageRef;

use super::update::RawUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Inline keyboard, one inner vector per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

/// Outbound side of the messaging platform. Every call is one network round
/// trip and may fail; callers decide whether to retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_updates(&self, offset: i64, limit: u8) -> Result<Vec<RawUpdate>>;

    async fn membership(&self, user_id: i64, chat_id: i64) -> Result<Membership>;

    async fn approve_join_request(&self, user_id: i64, chat_id: i64) -> Result<bool>;

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Copies `source` into `to_chat_id` without a "forwarded from" header.
    async fn copy_message(&self, to_chat_id: i64, source: MessageRef) -> Result<()>;

    async fn send_keyboard(&self, chat_id: i64, text: &str, keyboard: &Keyboard)
        -> Result<MessageRef>;

    async fn edit_keyboard(&self, target: MessageRef, text: &str, keyboard: &Keyboard)
        -> Result<()>;

    async fn delete_message(&self, target: MessageRef) -> Result<()>;
}
