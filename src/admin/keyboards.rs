//! Inline keyboards of the admin menu and the callback strings they carry.

use crate::{
    config::TextConfig,
    telegram::transport::{Button, Keyboard},
};

pub const SET_BROADCAST_MESSAGE: &str = "/setSendingMessage";
pub const SHOW_BROADCAST_MESSAGE: &str = "/showSendingMessage";
pub const SET_JOIN_MESSAGE: &str = "/setRequestMessage";
pub const SHOW_JOIN_MESSAGE: &str = "/showRequestMessage";
pub const TOGGLE_AUTO_ACCEPT: &str = "/requestToJoin";
pub const SET_BROADCAST_TIME: &str = "/setTimeForSentMessageToAllUsers";
pub const STATISTICS: &str = "/stat";
pub const BACK: &str = "/get-back";
pub const DELAY_MENU: &str = "/init-set-delay";
pub const SET_DELAY: &str = "/set-delay";
pub const CHECK_PENDING: &str = "/check-not-accepted-users";
pub const APPROVE_PENDING: &str = "/approve-not-accepted-users";

/// Join delays offered in the delay menu, in seconds.
pub const DELAY_CHOICES: [i64; 16] = [
    0, 5, 10, 15, 30, 60, 300, 600, 900, 1800, 3600, 7200, 21600, 43200, 64800, 86400,
];
const DELAY_ROW_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetBroadcastMessage,
    ShowBroadcastMessage,
    SetJoinMessage,
    ShowJoinMessage,
    ToggleAutoAccept,
    SetBroadcastTime,
    Statistics,
    Back,
    DelayMenu,
    SetDelay(i64),
    CheckPending,
    ApprovePending,
}

impl Command {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(rest) = data.strip_prefix(SET_DELAY) {
            let seconds = rest.strip_prefix('?')?.trim().parse::<i64>().ok()?;
            return DELAY_CHOICES
                .contains(&seconds)
                .then_some(Command::SetDelay(seconds));
        }
        let command = match data {
            SET_BROADCAST_MESSAGE => Command::SetBroadcastMessage,
            SHOW_BROADCAST_MESSAGE => Command::ShowBroadcastMessage,
            SET_JOIN_MESSAGE => Command::SetJoinMessage,
            SHOW_JOIN_MESSAGE => Command::ShowJoinMessage,
            TOGGLE_AUTO_ACCEPT => Command::ToggleAutoAccept,
            SET_BROADCAST_TIME => Command::SetBroadcastTime,
            STATISTICS => Command::Statistics,
            BACK => Command::Back,
            DELAY_MENU => Command::DelayMenu,
            CHECK_PENDING => Command::CheckPending,
            APPROVE_PENDING => Command::ApprovePending,
            _ => return None,
        };
        Some(command)
    }
}

pub fn main_menu(texts: &TextConfig, auto_accept: bool) -> Keyboard {
    let toggle = if auto_accept {
        &texts.keyboard_on_request_to_join
    } else {
        &texts.keyboard_off_request_to_join
    };
    Keyboard {
        rows: vec![
            vec![
                Button::new(&texts.keyboard_set_message_to_send, SET_BROADCAST_MESSAGE),
                Button::new(&texts.keyboard_show_message_to_send, SHOW_BROADCAST_MESSAGE),
            ],
            vec![
                Button::new(&texts.keyboard_set_request_msg, SET_JOIN_MESSAGE),
                Button::new(&texts.keyboard_show_request_msg, SHOW_JOIN_MESSAGE),
            ],
            vec![Button::new(toggle, TOGGLE_AUTO_ACCEPT)],
            vec![Button::new(&texts.keyboard_acceptance_delay, DELAY_MENU)],
            vec![Button::new(
                &texts.keyboard_set_time_for_send_message_for_all_users,
                SET_BROADCAST_TIME,
            )],
            vec![Button::new(&texts.keyboard_statistic, STATISTICS)],
            vec![Button::new(&texts.keyboard_check_not_accepted_users, CHECK_PENDING)],
        ],
    }
}

pub fn back_only(texts: &TextConfig) -> Keyboard {
    Keyboard {
        rows: vec![vec![Button::new(&texts.keyboard_get_back, BACK)]],
    }
}

pub fn pending_menu(texts: &TextConfig) -> Keyboard {
    Keyboard {
        rows: vec![
            vec![Button::new(&texts.approve_not_accepted_users, APPROVE_PENDING)],
            vec![Button::new(&texts.keyboard_get_back, BACK)],
        ],
    }
}

/// Delay choices in rows of four; the current value is starred.
pub fn delay_menu(texts: &TextConfig, current: i64) -> Keyboard {
    let buttons: Vec<Button> = DELAY_CHOICES
        .iter()
        .map(|&seconds| {
            let mut label = delay_label(seconds);
            if seconds == current {
                label.push('*');
            }
            Button::new(label, format!("{SET_DELAY}?{seconds}"))
        })
        .collect();

    let mut rows: Vec<Vec<Button>> = buttons
        .chunks(DELAY_ROW_WIDTH)
        .map(|row| row.to_vec())
        .collect();
    rows.push(vec![Button::new(&texts.keyboard_get_back, BACK)]);
    Keyboard { rows }
}

pub fn delay_label(seconds: i64) -> String {
    if seconds <= 30 {
        format!("{seconds}sec")
    } else if seconds < 3600 {
        format!("{}min", seconds / 60)
    } else {
        format!("{}h", seconds / 3600)
    }
}
