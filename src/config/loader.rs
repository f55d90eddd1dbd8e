use std::{env, time::Duration};

use chrono_tz::Tz;
use url::Url;

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, EngineConfig, LoggingConfig, TextConfig,
};

macro_rules! env_texts {
    ($base:expr, $($field:ident),+ $(,)?) => {{
        let mut texts = $base;
        $(
            if let Some(value) = non_empty(&stringify!($field).to_ascii_uppercase()) {
                texts.$field = value;
            }
        )+
        texts
    }};
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let telegram_bot_token = non_empty("TELEGRAM_BOT_TOKEN")
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let telegram_api_url = match non_empty("TELEGRAM_API_URL") {
            Some(raw) => Some(Url::parse(&raw).map_err(|_| ConfigError::Invalid {
                key: "TELEGRAM_API_URL",
                value: raw.clone(),
            })?),
            None => None,
        };

        let admin_user_ids = parse_admin_ids(
            &non_empty("ADMIN_USER_IDS").ok_or(ConfigError::Missing("ADMIN_USER_IDS"))?,
        )?;

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "storage.db".to_string()),
            auto_accept_filename: env::var("AUTO_ACCEPT_FILE")
                .unwrap_or_else(|_| ".auto_accept_status".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        let timezone = match non_empty("BOT_TIMEZONE") {
            Some(raw) => parse_timezone(&raw)?,
            None => chrono_tz::UTC,
        };

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            batch_size: parse_num("BATCH_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.batch_size),
            idle_poll_delay: parse_millis("IDLE_POLL_MS").unwrap_or(defaults.idle_poll_delay),
            retry_delay: parse_millis("RETRY_DELAY_MS").unwrap_or(defaults.retry_delay),
            request_timeout: parse_num::<u64>("REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            broadcast_poll_interval: parse_millis("BROADCAST_POLL_MS")
                .unwrap_or(defaults.broadcast_poll_interval),
            membership_interval: parse_num::<u64>("MEMBERSHIP_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.membership_interval),
            ..defaults
        };

        let texts = env_texts!(
            TextConfig::default(),
            keyboard_set_message_to_send,
            keyboard_show_message_to_send,
            keyboard_set_request_msg,
            keyboard_show_request_msg,
            keyboard_on_request_to_join,
            keyboard_off_request_to_join,
            keyboard_set_time_for_send_message_for_all_users,
            keyboard_statistic,
            keyboard_get_back,
            keyboard_this_is_msg_to_send,
            keyboard_this_is_msg_to_request_to_join,
            keyboard_acceptance_delay,
            keyboard_check_not_accepted_users,
            access_denied,
            command_not_found,
            message_not_found,
            list_of_commands,
            set_message_to_send_updated,
            send_message_will_be_sent,
            set_time_for_sending_message,
            set_sending_message,
            set_request_to_join_message,
            approve_not_accepted_users,
            not_accepted_users,
            start_accept_users,
            err_parse_time_for_sent_msg_to_all,
            err_msg_to_all_not_found,
            users_not_found,
            users_in_db,
            sent,
            message_was_sent,
            time_for_sending_not_found,
        );

        Ok(Self {
            telegram_bot_token,
            telegram_api_url,
            admin_user_ids,
            directories,
            logging,
            timezone,
            engine,
            texts,
        })
    }
}

pub fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| ConfigError::Invalid {
                key: "ADMIN_USER_IDS",
                value: part.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(ConfigError::Missing("ADMIN_USER_IDS"));
    }
    Ok(ids)
}

pub fn parse_timezone(raw: &str) -> Result<Tz, ConfigError> {
    raw.trim().parse::<Tz>().map_err(|_| ConfigError::Invalid {
        key: "BOT_TIMEZONE",
        value: raw.to_string(),
    })
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

fn parse_millis(key: &str) -> Option<Duration> {
    parse_num::<u64>(key).map(Duration::from_millis)
}
