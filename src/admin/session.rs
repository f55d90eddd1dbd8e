use std::collections::HashMap;

use anyhow::Result;

use crate::{
    db::messages::{KEY_BROADCAST, KEY_JOIN_MESSAGE},
    domain::MessageRef,
    infrastructure::flag_file::AutoAcceptFlag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSlot {
    JoinWelcome,
    Broadcast,
}

impl MessageSlot {
    pub fn key(self) -> &'static str {
        match self {
            MessageSlot::JoinWelcome => KEY_JOIN_MESSAGE,
            MessageSlot::Broadcast => KEY_BROADCAST,
        }
    }
}

/// What the admin's next plain message means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingInput {
    #[default]
    Command,
    Message(MessageSlot),
    BroadcastTime,
}

/// Admin interaction state, owned by the single event handler.
#[derive(Debug)]
pub struct AdminSession {
    auto_accept: AutoAcceptFlag,
    keyboards: HashMap<i64, MessageRef>,
    pending: HashMap<i64, PendingInput>,
}

impl AdminSession {
    pub fn new(auto_accept: AutoAcceptFlag) -> Self {
        Self {
            auto_accept,
            keyboards: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn auto_accept(&self) -> bool {
        self.auto_accept.enabled()
    }

    pub fn toggle_auto_accept(&mut self) -> Result<bool> {
        self.auto_accept.toggle()
    }

    pub fn pending_input(&self, admin_id: i64) -> PendingInput {
        self.pending.get(&admin_id).copied().unwrap_or_default()
    }

    pub fn expect_input(&mut self, admin_id: i64, input: PendingInput) {
        self.pending.insert(admin_id, input);
    }

    pub fn clear_input(&mut self, admin_id: i64) {
        self.pending.remove(&admin_id);
    }

    /// The keyboard message currently shown in `chat_id`, if any.
    pub fn keyboard(&self, chat_id: i64) -> Option<MessageRef> {
        self.keyboards.get(&chat_id).copied()
    }

    pub fn remember_keyboard(&mut self, keyboard: MessageRef) {
        self.keyboards.insert(keyboard.chat_id, keyboard);
    }

    pub fn forget_keyboard(&mut self, chat_id: i64) -> Option<MessageRef> {
        self.keyboards.remove(&chat_id)
    }
}
