use std::sync::Arc;

use anyhow::Result;

use crate::{
    db::Storage,
    domain::UserRecord,
    infrastructure::shutdown::ShutdownListener,
    telegram::transport::{Membership, Transport},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub changed: usize,
}

/// Keeps every user's channel sets in step with their actual membership.
pub struct MembershipSweeper {
    transport: Arc<dyn Transport>,
    storage: Storage,
}

impl MembershipSweeper {
    pub fn new(transport: Arc<dyn Transport>, storage: Storage) -> Self {
        Self { transport, storage }
    }

    /// Moves channels the user no longer belongs to into the left set and
    /// persists the change, then reloads `user` from the store. A failed
    /// check leaves that channel untouched.
    pub async fn refresh(&self, user: &mut UserRecord) -> Result<bool> {
        let channels: Vec<i64> = user.channel_ids.iter().copied().collect();
        let mut departed = Vec::new();
        for channel_id in channels {
            match self.transport.membership(user.id, channel_id).await {
                Ok(Membership::Member) => {}
                Ok(Membership::NotMember) => departed.push(channel_id),
                Err(err) => tracing::warn!(
                    target: "membership",
                    error = %err,
                    user_id = user.id,
                    channel_id,
                    "membership check failed"
                ),
            }
        }
        if departed.is_empty() {
            return Ok(false);
        }

        let Some(updated) = self
            .storage
            .users
            .record_departures(user.id, &departed)
            .await?
        else {
            return Ok(false);
        };
        *user = updated;
        tracing::info!(
            target: "membership",
            user_id = user.id,
            left = ?departed,
            "user left channels"
        );
        Ok(true)
    }

    /// Refreshes every known user, stopping early on shutdown.
    pub async fn sweep(&self, shutdown: &ShutdownListener) -> Result<SweepReport> {
        let users = self.storage.users.all().await?;
        let mut report = SweepReport::default();
        for mut user in users {
            if shutdown.is_triggered() {
                break;
            }
            if user.channel_ids.is_empty() {
                continue;
            }
            report.checked += 1;
            match self.refresh(&mut user).await {
                Ok(true) => report.changed += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(
                    target: "membership",
                    error = %err,
                    user_id = user.id,
                    "failed to refresh membership"
                ),
            }
        }
        Ok(report)
    }
}
