use std::convert::TryFrom;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{
        AllowedUpdate, ChatMemberStatus, InlineKeyboardButton, InlineKeyboardMarkup, MessageId,
        Update, UpdateKind, User,
    },
};

use crate::domain::MessageRef;

use super::{
    transport::{Keyboard, Membership, Transport},
    update::{RawCallbackQuery, RawChat, RawJoinRequest, RawMessage, RawUpdate, RawUser},
};

/// [`Transport`] backed by the Telegram Bot API through teloxide.
#[derive(Clone)]
pub struct TeloxideTransport {
    bot: Bot,
}

impl TeloxideTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TeloxideTransport {
    async fn fetch_updates(&self, offset: i64, limit: u8) -> Result<Vec<RawUpdate>> {
        let offset = i32::try_from(offset).context("update offset out of range")?;
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(limit)
            .allowed_updates(vec![
                AllowedUpdate::Message,
                AllowedUpdate::CallbackQuery,
                AllowedUpdate::ChatJoinRequest,
            ])
            .await
            .context("getUpdates failed")?;
        Ok(updates.into_iter().map(raw_update).collect())
    }

    async fn membership(&self, user_id: i64, chat_id: i64) -> Result<Membership> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), user_id_of(user_id)?)
            .await
            .with_context(|| format!("getChatMember failed for user {user_id} in {chat_id}"))?;
        Ok(
            if matches!(
                member.status(),
                ChatMemberStatus::Left | ChatMemberStatus::Banned
            ) {
                Membership::NotMember
            } else {
                Membership::Member
            },
        )
    }

    async fn approve_join_request(&self, user_id: i64, chat_id: i64) -> Result<bool> {
        self.bot
            .approve_chat_join_request(ChatId(chat_id), user_id_of(user_id)?)
            .await
            .with_context(|| format!("approveChatJoinRequest failed for user {user_id}"))?;
        Ok(true)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .with_context(|| format!("sendMessage failed for chat {chat_id}"))?;
        Ok(())
    }

    async fn copy_message(&self, to_chat_id: i64, source: MessageRef) -> Result<()> {
        self.bot
            .copy_message(
                ChatId(to_chat_id),
                ChatId(source.chat_id),
                MessageId(source.message_id),
            )
            .disable_notification(true)
            .await
            .with_context(|| {
                format!(
                    "copyMessage {} from {} to {to_chat_id} failed",
                    source.message_id, source.chat_id
                )
            })?;
        Ok(())
    }

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<MessageRef> {
        let sent = self
            .bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(markup(keyboard))
            .await
            .with_context(|| format!("sendMessage with keyboard failed for chat {chat_id}"))?;
        Ok(MessageRef {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }

    async fn edit_keyboard(&self, target: MessageRef, text: &str, keyboard: &Keyboard) -> Result<()> {
        self.bot
            .edit_message_text(
                ChatId(target.chat_id),
                MessageId(target.message_id),
                text,
            )
            .reply_markup(markup(keyboard))
            .await
            .with_context(|| format!("editMessageText failed for message {}", target.message_id))?;
        Ok(())
    }

    async fn delete_message(&self, target: MessageRef) -> Result<()> {
        self.bot
            .delete_message(ChatId(target.chat_id), MessageId(target.message_id))
            .await
            .with_context(|| format!("deleteMessage failed for message {}", target.message_id))?;
        Ok(())
    }
}

fn user_id_of(user_id: i64) -> Result<UserId> {
    let raw = u64::try_from(user_id).with_context(|| format!("invalid user id {user_id}"))?;
    Ok(UserId(raw))
}

fn markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.text.clone(), button.data.clone()))
            .collect::<Vec<_>>()
    }))
}

fn raw_update(update: Update) -> RawUpdate {
    let mut raw = RawUpdate {
        update_id: update.id.0 as i64,
        ..Default::default()
    };
    match update.kind {
        UpdateKind::Message(msg) => {
            raw.message = Some(RawMessage {
                message_id: msg.id.0,
                from: msg.from.as_ref().map(raw_user),
                chat: RawChat { id: msg.chat.id.0 },
                text: msg.text().map(str::to_string),
            });
        }
        UpdateKind::ChatJoinRequest(request) => {
            raw.chat_join_request = Some(RawJoinRequest {
                from: raw_user(&request.from),
                chat: RawChat {
                    id: request.chat.id.0,
                },
            });
        }
        UpdateKind::CallbackQuery(query) => {
            raw.callback_query = Some(RawCallbackQuery {
                from: raw_user(&query.from),
                message: query.message.as_ref().map(|message| RawMessage {
                    message_id: message.id().0,
                    from: None,
                    chat: RawChat {
                        id: message.chat().id.0,
                    },
                    text: None,
                }),
                data: query.data.clone(),
            });
        }
        other => {
            tracing::debug!(target: "telegram", kind = ?other, "unsupported update kind");
        }
    }
    raw
}

fn raw_user(user: &User) -> RawUser {
    RawUser {
        id: user.id.0 as i64,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}
