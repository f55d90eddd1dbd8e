//! Test doubles shared by the unit tests.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tempfile::TempDir;

use crate::{
    config::{
        env::{DirectoryConfig, LoggingConfig},
        AppConfig, EngineConfig, TextConfig,
    },
    db::Storage,
    domain::{Event, EventKind, JoinRequest, MessageRef, UserProfile},
    telegram::{
        transport::{Keyboard, Membership, Transport},
        update::RawUpdate,
    },
};

/// Everything the recording transport was asked to do, plus the knobs that
/// script its answers.
#[derive(Default)]
pub struct TransportState {
    pub scripted_updates: VecDeque<Result<Vec<RawUpdate>, String>>,
    pub fetch_offsets: Vec<i64>,
    pub non_members: HashSet<(i64, i64)>,
    pub membership_checks: Vec<(i64, i64)>,
    pub approvals: Vec<(i64, i64)>,
    pub texts: Vec<(i64, String)>,
    pub copies: Vec<(i64, MessageRef)>,
    pub keyboards: Vec<(i64, String, Keyboard)>,
    pub edits: Vec<(MessageRef, String, Keyboard)>,
    pub deletions: Vec<MessageRef>,
    pub fail_approvals: bool,
    pub fail_copies_to: HashSet<i64>,
    pub fail_edits: bool,
    next_message_id: i32,
}

#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn fetch_updates(&self, offset: i64, _limit: u8) -> Result<Vec<RawUpdate>> {
        let mut state = self.state.lock();
        state.fetch_offsets.push(offset);
        match state.scripted_updates.pop_front() {
            Some(Ok(updates)) => Ok(updates),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn membership(&self, user_id: i64, chat_id: i64) -> Result<Membership> {
        let mut state = self.state.lock();
        state.membership_checks.push((user_id, chat_id));
        if state.non_members.contains(&(user_id, chat_id)) {
            Ok(Membership::NotMember)
        } else {
            Ok(Membership::Member)
        }
    }

    async fn approve_join_request(&self, user_id: i64, chat_id: i64) -> Result<bool> {
        let mut state = self.state.lock();
        state.approvals.push((user_id, chat_id));
        if state.fail_approvals {
            return Err(anyhow!("approve rejected"));
        }
        Ok(true)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.state.lock().texts.push((chat_id, text.to_string()));
        Ok(())
    }

    async fn copy_message(&self, to_chat_id: i64, source: MessageRef) -> Result<()> {
        let mut state = self.state.lock();
        state.copies.push((to_chat_id, source));
        if state.fail_copies_to.contains(&to_chat_id) {
            return Err(anyhow!("bot was blocked by the user"));
        }
        Ok(())
    }

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<MessageRef> {
        let mut state = self.state.lock();
        state.next_message_id += 1;
        let message_id = 1000 + state.next_message_id;
        state
            .keyboards
            .push((chat_id, text.to_string(), keyboard.clone()));
        Ok(MessageRef {
            chat_id,
            message_id,
        })
    }

    async fn edit_keyboard(&self, target: MessageRef, text: &str, keyboard: &Keyboard) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_edits {
            return Err(anyhow!("message is not modified"));
        }
        state.edits.push((target, text.to_string(), keyboard.clone()));
        Ok(())
    }

    async fn delete_message(&self, target: MessageRef) -> Result<()> {
        self.state.lock().deletions.push(target);
        Ok(())
    }
}

pub async fn temp_storage() -> (TempDir, Storage) {
    let dir = tempfile::tempdir().expect("temp dir");
    let storage = Storage::open(&dir.path().join("test.db"))
        .await
        .expect("open storage");
    (dir, storage)
}

/// Engine settings with every pause and cadence collapsed to zero.
pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        idle_poll_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        fetch_backoff_initial: Duration::ZERO,
        fetch_backoff_max: Duration::ZERO,
        delayed_join_interval: Duration::ZERO,
        broadcast_poll_interval: Duration::ZERO,
        membership_initial_delay: Duration::ZERO,
        membership_interval: Duration::ZERO,
        notify_pause: Duration::ZERO,
        broadcast_pause: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn test_config(admins: &[i64]) -> AppConfig {
    AppConfig {
        telegram_bot_token: "test-token".into(),
        telegram_api_url: None,
        admin_user_ids: admins.to_vec(),
        directories: DirectoryConfig {
            logs_dir: "logs".into(),
            data_dir: "data".into(),
            db_filename: "storage.db".into(),
            auto_accept_filename: ".auto_accept_status".into(),
        },
        logging: LoggingConfig {
            level: "debug".into(),
        },
        timezone: chrono_tz::UTC,
        engine: fast_engine(),
        texts: TextConfig::default(),
    }
}

pub fn profile(id: i64) -> UserProfile {
    UserProfile {
        id,
        first_name: format!("user{id}"),
        ..Default::default()
    }
}

pub fn join_request(user_id: i64, chat_id: i64) -> JoinRequest {
    JoinRequest {
        user: profile(user_id),
        chat_id,
    }
}

pub fn join_event(update_id: i64, user_id: i64, chat_id: i64) -> Event {
    Event {
        update_id,
        kind: EventKind::JoinRequest(join_request(user_id, chat_id)),
    }
}
