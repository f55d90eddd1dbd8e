use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::event::{JoinRequest, MessageRef};

/// A join request waiting in the store for its approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJoinRequest {
    pub request: JoinRequest,
    pub update_id: i64,
    pub due_at: DateTime<Utc>,
    pub auto_accept_at_due: bool,
}

/// The scheduled "send to all" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastJob {
    pub source: MessageRef,
    pub scheduled_at: DateTime<Utc>,
}

/// A stored message pointer, optionally carrying a send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMessage {
    pub source: MessageRef,
    pub send_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub channel_ids: BTreeSet<i64>,
    pub left_channel_ids: BTreeSet<i64>,
    pub last_delivered_message_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Moves `departed` channels from the active set into the left set.
    /// Returns whether anything changed.
    pub fn record_departures(&mut self, departed: &[i64]) -> bool {
        let mut changed = false;
        for channel in departed {
            changed |= self.channel_ids.remove(channel);
            changed |= self.left_channel_ids.insert(*channel);
        }
        changed
    }

    pub fn display_name(&self) -> String {
        if !self.username.is_empty() {
            return format!("@{}", self.username);
        }
        let name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        if name.is_empty() {
            self.id.to_string()
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(channels: &[i64], left: &[i64]) -> UserRecord {
        UserRecord {
            id: 1,
            first_name: "Ann".into(),
            last_name: String::new(),
            username: String::new(),
            channel_ids: channels.iter().copied().collect(),
            left_channel_ids: left.iter().copied().collect(),
            last_delivered_message_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn departures_move_channels_without_duplicates() {
        let mut record = user(&[-100, -200], &[-100]);
        assert!(record.record_departures(&[-100]));
        assert_eq!(record.channel_ids, BTreeSet::from([-200]));
        assert_eq!(record.left_channel_ids, BTreeSet::from([-100]));
        assert!(!record.record_departures(&[-100]));
    }

    #[test]
    fn display_name_prefers_username() {
        let mut record = user(&[], &[]);
        assert_eq!(record.display_name(), "Ann");
        record.username = "ann".into();
        assert_eq!(record.display_name(), "@ann");
    }
}
