use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub telegram_api_url: Option<Url>,
    pub admin_user_ids: Vec<i64>,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub timezone: Tz,
    pub engine: EngineConfig,
    pub texts: TextConfig,
}

impl AppConfig {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
    pub auto_accept_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

/// Cadences and pacing of the ingestion loop and the background loops.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: u8,
    pub idle_poll_delay: Duration,
    pub process_attempts: u32,
    pub retry_delay: Duration,
    pub fetch_backoff_initial: Duration,
    pub fetch_backoff_max: Duration,
    pub request_timeout: Duration,
    pub delayed_join_interval: Duration,
    pub broadcast_poll_interval: Duration,
    pub membership_initial_delay: Duration,
    pub membership_interval: Duration,
    pub notify_pause: Duration,
    pub broadcast_pause: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            idle_poll_delay: Duration::from_secs(3),
            process_attempts: 3,
            retry_delay: Duration::from_secs(3),
            fetch_backoff_initial: Duration::from_millis(500),
            fetch_backoff_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            delayed_join_interval: Duration::from_secs(3),
            broadcast_poll_interval: Duration::from_secs(1),
            membership_initial_delay: Duration::from_secs(5),
            membership_interval: Duration::from_secs(20 * 60),
            notify_pause: Duration::from_secs(2),
            broadcast_pause: Duration::from_secs(3),
        }
    }
}

/// Admin-facing texts. Each one can be overridden by the environment variable
/// carrying the field name in upper case.
#[derive(Debug, Clone)]
pub struct TextConfig {
    pub keyboard_set_message_to_send: String,
    pub keyboard_show_message_to_send: String,
    pub keyboard_set_request_msg: String,
    pub keyboard_show_request_msg: String,
    pub keyboard_on_request_to_join: String,
    pub keyboard_off_request_to_join: String,
    pub keyboard_set_time_for_send_message_for_all_users: String,
    pub keyboard_statistic: String,
    pub keyboard_get_back: String,
    pub keyboard_this_is_msg_to_send: String,
    pub keyboard_this_is_msg_to_request_to_join: String,
    pub keyboard_acceptance_delay: String,
    pub keyboard_check_not_accepted_users: String,
    pub access_denied: String,
    pub command_not_found: String,
    pub message_not_found: String,
    pub list_of_commands: String,
    pub set_message_to_send_updated: String,
    pub send_message_will_be_sent: String,
    pub set_time_for_sending_message: String,
    pub set_sending_message: String,
    pub set_request_to_join_message: String,
    pub approve_not_accepted_users: String,
    pub not_accepted_users: String,
    pub start_accept_users: String,
    pub err_parse_time_for_sent_msg_to_all: String,
    pub err_msg_to_all_not_found: String,
    pub users_not_found: String,
    pub users_in_db: String,
    pub sent: String,
    pub message_was_sent: String,
    pub time_for_sending_not_found: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            keyboard_set_message_to_send: "Set message to send".into(),
            keyboard_show_message_to_send: "Show message to send".into(),
            keyboard_set_request_msg: "Set join message".into(),
            keyboard_show_request_msg: "Show join message".into(),
            keyboard_on_request_to_join: "Request to join: On".into(),
            keyboard_off_request_to_join: "Request to join: Off".into(),
            keyboard_set_time_for_send_message_for_all_users:
                "Set time for send message to all users".into(),
            keyboard_statistic: "Statistics".into(),
            keyboard_get_back: "Back".into(),
            keyboard_this_is_msg_to_send: "^This is the current message to send to all users"
                .into(),
            keyboard_this_is_msg_to_request_to_join:
                "^This is the current message for accepted join requests".into(),
            keyboard_acceptance_delay: "Acceptance delay for request to join".into(),
            keyboard_check_not_accepted_users: "Show info about not accepted users".into(),
            access_denied: "Access is denied".into(),
            command_not_found: "Command not found".into(),
            message_not_found: "Message not found".into(),
            list_of_commands: "List of commands".into(),
            set_message_to_send_updated: "Message to send was updated".into(),
            send_message_will_be_sent: "Message for all users will be sent: ".into(),
            set_time_for_sending_message: "Send the time for the message to all users in the \
                format day.month.year hours:minutes, like 02.01.2006 15:04"
                .into(),
            set_sending_message: "Send a message to send to all users in this chat and do not \
                delete it before sending"
                .into(),
            set_request_to_join_message: "Send a message that will be sent when accepted into \
                the group and do not delete it until you change to a new one"
                .into(),
            approve_not_accepted_users: "Approve not accepted users".into(),
            not_accepted_users: "The number of unaccepted users in the database: ".into(),
            start_accept_users: "Accept users was started".into(),
            err_parse_time_for_sent_msg_to_all: "Can not parse this time, required format: \
                dd.mm.yyyy hh:mm"
                .into(),
            err_msg_to_all_not_found: "Message to send to all users not found".into(),
            users_not_found: "Users not found. ".into(),
            users_in_db: "Users in db:".into(),
            sent: "sent".into(),
            message_was_sent: "The message was sent".into(),
            time_for_sending_not_found: "Time for sending message is not found".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
