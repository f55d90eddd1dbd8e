use std::fmt;

use serde::{Deserialize, Serialize};

/// A chat/message pair addressing one Telegram message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message: MessageRef,
    pub from: Option<UserProfile>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user: UserProfile,
    pub chat_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub from: UserProfile,
    pub origin: Option<MessageRef>,
    pub data: String,
}

impl CallbackPayload {
    /// Chat the answer goes to: the keyboard's chat, or the private chat with
    /// the presser when the keyboard message is no longer accessible.
    pub fn reply_chat_id(&self) -> i64 {
        self.origin
            .map(|origin| origin.chat_id)
            .unwrap_or(self.from.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message(InboundMessage),
    JoinRequest(JoinRequest),
    Callback(CallbackPayload),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Message,
    RequestToJoin,
    CallbackQuery,
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::RequestToJoin => "request_to_join",
            EventType::CallbackQuery => "callback_query",
            EventType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified update. `update_id` is the stable identity used by the
/// lost-event buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub update_id: i64,
    pub kind: EventKind,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match &self.kind {
            EventKind::Message(_) => EventType::Message,
            EventKind::JoinRequest(_) => EventType::RequestToJoin,
            EventKind::Callback(_) => EventType::CallbackQuery,
            EventKind::Unknown => EventType::Unknown,
        }
    }

    pub fn text(&self) -> &str {
        match &self.kind {
            EventKind::Message(message) => &message.text,
            _ => "",
        }
    }
}
