//! Bot API update shape as seen by the classifier.
//!
//! Every payload field is optional so that ambiguous or partial updates can
//! still be represented; the classifier resolves precedence.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub chat_join_request: Option<RawJoinRequest>,
    #[serde(default)]
    pub callback_query: Option<RawCallbackQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChat {
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub message_id: i32,
    #[serde(default)]
    pub from: Option<RawUser>,
    pub chat: RawChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJoinRequest {
    pub from: RawUser,
    pub chat: RawChat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCallbackQuery {
    pub from: RawUser,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub data: Option<String>,
}
