use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{
    admin::{
        keyboards::{self, Command},
        session::{AdminSession, MessageSlot, PendingInput},
    },
    config::{AppConfig, TextConfig},
    db::{
        delays::KEY_JOIN_DELAY,
        messages::{KEY_BROADCAST, KEY_JOIN_MESSAGE, KEY_LAST_BROADCAST},
        Storage,
    },
    domain::{CallbackPayload, Event, EventKind, InboundMessage, MessageRef},
    tasks::{admission::Admission, listener::EventHandler, reconcile::spawn_approve_all},
    telegram::transport::{Keyboard, Transport},
};

/// `dd.mm.yyyy hh:mm`, read and shown in the bot's timezone.
pub const BROADCAST_TIME_FORMAT: &str = "%d.%m.%Y %H:%M";

/// Routes every classified event: join requests go to admission, messages
/// and button presses drive the admin menu.
pub struct BotHandler {
    transport: Arc<dyn Transport>,
    storage: Storage,
    admission: Arc<Admission>,
    config: Arc<AppConfig>,
    session: AdminSession,
    timezone: Tz,
}

#[async_trait]
impl EventHandler for BotHandler {
    async fn handle(&mut self, event: &Event) -> Result<()> {
        match &event.kind {
            EventKind::JoinRequest(request) => {
                let auto_accept = self.session.auto_accept();
                self.admission
                    .receive(request, event.update_id, auto_accept)
                    .await?;
                Ok(())
            }
            EventKind::Message(message) => self.on_message(message).await,
            EventKind::Callback(callback) => self.on_callback(callback).await,
            EventKind::Unknown => {
                tracing::debug!(target: "admin", update_id = event.update_id, "ignoring unknown update");
                Ok(())
            }
        }
    }
}

impl BotHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Storage,
        admission: Arc<Admission>,
        config: Arc<AppConfig>,
        session: AdminSession,
        timezone: Tz,
    ) -> Self {
        Self {
            transport,
            storage,
            admission,
            config,
            session,
            timezone,
        }
    }

    fn texts(&self) -> &TextConfig {
        &self.config.texts
    }

    fn main_menu(&self) -> Keyboard {
        keyboards::main_menu(self.texts(), self.session.auto_accept())
    }

    async fn on_message(&mut self, message: &InboundMessage) -> Result<()> {
        let Some(from) = &message.from else {
            tracing::debug!(target: "admin", chat_id = message.message.chat_id, "message without sender");
            return Ok(());
        };
        let chat_id = message.message.chat_id;
        if !self.config.is_admin(from.id) {
            tracing::info!(target: "admin", user_id = from.id, "message from non-admin");
            return self
                .transport
                .send_text(chat_id, &self.texts().access_denied)
                .await;
        }

        match self.session.pending_input(from.id) {
            PendingInput::Message(slot) => {
                self.store_message(chat_id, slot, message.message).await?;
                self.session.clear_input(from.id);
                return Ok(());
            }
            PendingInput::BroadcastTime => {
                self.store_broadcast_time(chat_id, &message.text).await?;
                self.session.clear_input(from.id);
                return Ok(());
            }
            PendingInput::Command => {}
        }

        match message.text.trim() {
            "/start" => {
                let text = self.texts().list_of_commands.clone();
                let menu = self.main_menu();
                self.open_menu(chat_id, &text, &menu).await
            }
            _ => {
                self.transport
                    .send_text(chat_id, &self.texts().command_not_found)
                    .await
            }
        }
    }

    async fn on_callback(&mut self, callback: &CallbackPayload) -> Result<()> {
        let chat_id = callback.reply_chat_id();
        let admin_id = callback.from.id;
        if !self.config.is_admin(admin_id) {
            tracing::info!(target: "admin", user_id = admin_id, "button press from non-admin");
            return self
                .transport
                .send_text(chat_id, &self.texts().access_denied)
                .await;
        }
        if let Some(origin) = callback.origin {
            self.session.remember_keyboard(origin);
        }

        let Some(command) = Command::parse(&callback.data) else {
            tracing::debug!(target: "admin", data = %callback.data, "unknown callback");
            return self
                .transport
                .send_text(chat_id, &self.texts().command_not_found)
                .await;
        };
        tracing::debug!(target: "admin", ?command, admin_id, "admin command");

        let texts = self.config.texts.clone();
        match command {
            Command::SetDelay(seconds) => {
                if let Err(err) = self.storage.delays.set(KEY_JOIN_DELAY, seconds).await {
                    tracing::error!(target: "admin", error = %err, seconds, "failed to store join delay");
                }
                self.show_delay_menu(chat_id).await
            }
            Command::DelayMenu => self.show_delay_menu(chat_id).await,
            Command::CheckPending => {
                let count = self.admission.count_awaiting_manual().await?;
                let text = format!("{}{}", texts.not_accepted_users, count);
                self.show_menu(chat_id, &text, &keyboards::pending_menu(&texts))
                    .await
            }
            Command::ApprovePending => {
                spawn_approve_all(self.admission.clone());
                let menu = self.main_menu();
                self.show_menu(chat_id, &texts.start_accept_users, &menu)
                    .await
            }
            Command::SetBroadcastTime => {
                self.session
                    .expect_input(admin_id, PendingInput::BroadcastTime);
                self.show_menu(
                    chat_id,
                    &texts.set_time_for_sending_message,
                    &keyboards::back_only(&texts),
                )
                .await
            }
            Command::Back => {
                self.session.clear_input(admin_id);
                let menu = self.main_menu();
                self.open_menu(chat_id, &texts.list_of_commands, &menu)
                    .await
            }
            Command::SetBroadcastMessage => {
                self.session
                    .expect_input(admin_id, PendingInput::Message(MessageSlot::Broadcast));
                let menu = self.main_menu();
                self.show_menu(chat_id, &texts.set_sending_message, &menu)
                    .await
            }
            Command::SetJoinMessage => {
                self.session
                    .expect_input(admin_id, PendingInput::Message(MessageSlot::JoinWelcome));
                let menu = self.main_menu();
                self.show_menu(chat_id, &texts.set_request_to_join_message, &menu)
                    .await
            }
            Command::ShowBroadcastMessage => {
                self.show_stored(chat_id, KEY_BROADCAST, &texts.keyboard_this_is_msg_to_send)
                    .await
            }
            Command::ShowJoinMessage => {
                self.show_stored(
                    chat_id,
                    KEY_JOIN_MESSAGE,
                    &texts.keyboard_this_is_msg_to_request_to_join,
                )
                .await
            }
            Command::Statistics => self.show_statistics(chat_id).await,
            Command::ToggleAutoAccept => {
                let enabled = self.session.toggle_auto_accept()?;
                tracing::info!(target: "admin", enabled, admin_id, "auto-accept toggled");
                let menu = self.main_menu();
                self.show_menu(chat_id, &texts.list_of_commands, &menu)
                    .await
            }
        }
    }

    async fn store_message(&mut self, chat_id: i64, slot: MessageSlot, source: MessageRef) -> Result<()> {
        self.storage.messages.save(slot.key(), source).await?;
        if slot == MessageSlot::Broadcast {
            self.storage
                .messages
                .save(KEY_LAST_BROADCAST, source)
                .await?;
        }
        tracing::info!(
            target: "admin",
            key = slot.key(),
            message_id = source.message_id,
            "stored message"
        );
        let text = self.texts().set_message_to_send_updated.clone();
        let menu = self.main_menu();
        self.show_menu(chat_id, &text, &menu).await
    }

    async fn store_broadcast_time(&mut self, chat_id: i64, raw: &str) -> Result<()> {
        let texts = self.config.texts.clone();
        let menu = self.main_menu();

        let Some(at) = parse_broadcast_time(raw, &self.timezone) else {
            tracing::info!(target: "admin", input = raw.trim(), "unparsable broadcast time");
            return self
                .show_menu(chat_id, &texts.err_parse_time_for_sent_msg_to_all, &menu)
                .await;
        };

        if self.storage.messages.get(KEY_BROADCAST).await?.is_none() {
            return self
                .show_menu(chat_id, &texts.err_msg_to_all_not_found, &menu)
                .await;
        }

        for key in [KEY_BROADCAST, KEY_LAST_BROADCAST] {
            if let Err(err) = self.storage.messages.schedule(key, at).await {
                tracing::error!(target: "admin", error = %err, key, "failed to schedule broadcast");
            }
        }
        tracing::info!(target: "admin", send_at = %at, "broadcast scheduled");

        let text = format!(
            "{}{}",
            texts.send_message_will_be_sent,
            format_local(at, &self.timezone)
        );
        self.show_menu(chat_id, &text, &menu).await
    }

    async fn show_delay_menu(&mut self, chat_id: i64) -> Result<()> {
        let current = match self.storage.delays.get(KEY_JOIN_DELAY).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(target: "admin", error = %err, "failed to read join delay");
                0
            }
        };
        let texts = self.config.texts.clone();
        self.open_menu(
            chat_id,
            &texts.keyboard_acceptance_delay,
            &keyboards::delay_menu(&texts, current),
        )
        .await
    }

    async fn show_stored(&mut self, chat_id: i64, key: &str, caption: &str) -> Result<()> {
        let Some(stored) = self.storage.messages.get(key).await? else {
            return self
                .transport
                .send_text(chat_id, &self.texts().message_not_found)
                .await;
        };
        self.transport.copy_message(chat_id, stored.source).await?;
        let back = keyboards::back_only(self.texts());
        self.open_menu(chat_id, caption, &back).await
    }

    async fn show_statistics(&mut self, chat_id: i64) -> Result<()> {
        let texts = self.config.texts.clone();
        let menu = self.main_menu();
        let Some(last) = self.storage.messages.get(KEY_LAST_BROADCAST).await? else {
            return self
                .show_menu(chat_id, &texts.err_msg_to_all_not_found, &menu)
                .await;
        };

        let users = self.storage.users.count().await?;
        let delivered = self
            .storage
            .users
            .count_delivered(last.source.message_id)
            .await?;
        let text = format_statistics(
            &texts,
            users,
            delivered,
            last.send_at,
            Utc::now(),
            &self.timezone,
        );
        self.show_menu(chat_id, &text, &menu).await
    }

    /// Edits the chat's current keyboard in place, falling back to a new one.
    async fn show_menu(&mut self, chat_id: i64, text: &str, keyboard: &Keyboard) -> Result<()> {
        if let Some(target) = self.session.keyboard(chat_id) {
            match self.transport.edit_keyboard(target, text, keyboard).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::debug!(target: "admin", error = %err, "keyboard edit failed, sending a new one")
                }
            }
        }
        let shown = self.transport.send_keyboard(chat_id, text, keyboard).await?;
        self.session.remember_keyboard(shown);
        Ok(())
    }

    /// Replaces the chat's current keyboard with a fresh one at the bottom.
    async fn open_menu(&mut self, chat_id: i64, text: &str, keyboard: &Keyboard) -> Result<()> {
        if let Some(previous) = self.session.forget_keyboard(chat_id) {
            if let Err(err) = self.transport.delete_message(previous).await {
                tracing::debug!(target: "admin", error = %err, "failed to delete previous keyboard");
            }
        }
        let shown = self.transport.send_keyboard(chat_id, text, keyboard).await?;
        self.session.remember_keyboard(shown);
        Ok(())
    }
}

pub fn parse_broadcast_time(raw: &str, timezone: &Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), BROADCAST_TIME_FORMAT).ok()?;
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn format_local(at: DateTime<Utc>, timezone: &Tz) -> String {
    at.with_timezone(timezone)
        .format(BROADCAST_TIME_FORMAT)
        .to_string()
}

/// Delivery progress of the last broadcast plus its schedule state.
pub fn format_statistics(
    texts: &TextConfig,
    users: i64,
    delivered: i64,
    send_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timezone: &Tz,
) -> String {
    let progress = if users > 0 {
        format!(
            "{} {}. {} {}%. ",
            texts.users_in_db,
            users,
            texts.sent,
            delivered * 100 / users
        )
    } else {
        texts.users_not_found.clone()
    };

    let schedule = match send_at {
        None => texts.time_for_sending_not_found.clone(),
        Some(at) if at <= now => {
            format!("{}: {}", texts.message_was_sent, format_local(at, timezone))
        }
        Some(at) => format!(
            "{}{}",
            texts.send_message_will_be_sent,
            format_local(at, timezone)
        ),
    };
    progress + &schedule
}
