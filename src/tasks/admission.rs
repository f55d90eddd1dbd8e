use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::{
    db::{delays::KEY_JOIN_DELAY, messages::KEY_JOIN_MESSAGE, Storage},
    domain::{JoinRequest, PendingJoinRequest},
    telegram::transport::Transport,
};

/// Welcome copies sent between two pauses.
const NOTIFY_BURST: u64 = 20;

/// What to do with a fresh join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ApproveNow,
    Defer {
        delay_secs: i64,
        auto_accept_at_due: bool,
    },
}

/// Auto-accept with no delay approves at once. Everything else is queued:
/// with the delay when auto-accept is on, or for the admin otherwise.
pub fn decide(auto_accept: bool, delay_secs: i64) -> Decision {
    match (auto_accept, delay_secs) {
        (true, secs) if secs <= 0 => Decision::ApproveNow,
        (true, secs) => Decision::Defer {
            delay_secs: secs,
            auto_accept_at_due: true,
        },
        (false, _) => Decision::Defer {
            delay_secs: 0,
            auto_accept_at_due: false,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Notified,
    /// Approved, but the user already belongs to another channel.
    AlreadyMember,
    /// Approved, but no welcome message is configured.
    NoJoinMessage,
    /// Another path claimed the request first, or a newer request replaced it.
    AlreadyResolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admitted {
    Resolved(Resolution),
    Deferred(PendingJoinRequest),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApproveAllReport {
    pub approved: usize,
    pub failed: usize,
}

/// Pauses after every burst of welcome copies, shared by every resolver.
#[derive(Debug)]
pub struct NotifyPacer {
    sent: AtomicU64,
    pause: Duration,
}

impl NotifyPacer {
    pub fn new(pause: Duration) -> Self {
        Self {
            sent: AtomicU64::new(0),
            pause,
        }
    }

    async fn record_sent(&self) {
        let sent = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if sent % NOTIFY_BURST == 0 {
            tracing::debug!(target: "admission", sent, "pausing welcome messages");
            sleep(self.pause).await;
        }
    }
}

/// Join-request admission: decides, queues and resolves requests.
pub struct Admission {
    transport: Arc<dyn Transport>,
    storage: Storage,
    pacer: NotifyPacer,
}

impl Admission {
    pub fn new(transport: Arc<dyn Transport>, storage: Storage, notify_pause: Duration) -> Self {
        Self {
            transport,
            storage,
            pacer: NotifyPacer::new(notify_pause),
        }
    }

    /// Records the user, then approves or queues the request.
    pub async fn receive(
        &self,
        request: &JoinRequest,
        update_id: i64,
        auto_accept: bool,
    ) -> Result<Admitted> {
        self.storage
            .users
            .record_request(&request.user, request.chat_id)
            .await?;

        let delay = match self.storage.delays.get(KEY_JOIN_DELAY).await {
            Ok(delay) => delay,
            Err(err) => {
                tracing::warn!(target: "admission", error = %err, "failed to read join delay, using 0");
                0
            }
        };

        match decide(auto_accept, delay) {
            Decision::ApproveNow => {
                let resolution = self.approve_and_notify(request).await?;
                Ok(Admitted::Resolved(resolution))
            }
            Decision::Defer {
                delay_secs,
                auto_accept_at_due,
            } => {
                let pending = PendingJoinRequest {
                    request: request.clone(),
                    update_id,
                    due_at: Utc::now() + chrono::Duration::seconds(delay_secs),
                    auto_accept_at_due,
                };
                self.storage.join_requests.upsert(&pending).await?;
                tracing::info!(
                    target: "admission",
                    user_id = request.user.id,
                    chat_id = request.chat_id,
                    due_at = %pending.due_at,
                    auto_accept_at_due,
                    "join request deferred"
                );
                Ok(Admitted::Deferred(pending))
            }
        }
    }

    /// Claims the queued request and approves it. Safe to call from several
    /// loops at once: only the claimer approves. A failed approval puts the
    /// request back so a later pass retries it.
    pub async fn resolve(&self, pending: &PendingJoinRequest) -> Result<Resolution> {
        let request = &pending.request;
        if !self.storage.join_requests.claim(pending).await? {
            tracing::debug!(
                target: "admission",
                user_id = request.user.id,
                chat_id = request.chat_id,
                "join request already resolved"
            );
            return Ok(Resolution::AlreadyResolved);
        }

        if let Err(err) = self.approve(request).await {
            if let Err(restore_err) = self.storage.join_requests.restore(pending).await {
                tracing::error!(
                    target: "admission",
                    error = %restore_err,
                    user_id = request.user.id,
                    chat_id = request.chat_id,
                    "failed to requeue join request"
                );
            }
            return Err(err);
        }
        self.notify(request).await
    }

    /// Resolves auto-accepted requests whose delay elapsed. Returns how many
    /// this call approved.
    pub async fn resolve_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.storage.join_requests.due(now).await?;
        let mut resolved = 0;
        for pending in &due {
            match self.resolve(pending).await {
                Ok(Resolution::AlreadyResolved) => {}
                Ok(_) => resolved += 1,
                Err(err) => tracing::error!(
                    target: "admission",
                    error = %err,
                    user_id = pending.request.user.id,
                    chat_id = pending.request.chat_id,
                    "failed to resolve delayed join request"
                ),
            }
        }
        Ok(resolved)
    }

    /// Approves every request recorded while auto-accept was off.
    pub async fn approve_all_pending(&self) -> Result<ApproveAllReport> {
        let pending = self.storage.join_requests.awaiting_manual().await?;
        tracing::info!(target: "admission", total = pending.len(), "approving pending join requests");

        let mut report = ApproveAllReport::default();
        for request in &pending {
            match self.resolve(request).await {
                Ok(Resolution::AlreadyResolved) => {}
                Ok(_) => report.approved += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        target: "admission",
                        error = %err,
                        user_id = request.request.user.id,
                        "failed to approve pending join request"
                    );
                }
            }
        }
        tracing::info!(
            target: "admission",
            approved = report.approved,
            failed = report.failed,
            "pending join requests processed"
        );
        Ok(report)
    }

    pub async fn count_awaiting_manual(&self) -> Result<i64> {
        self.storage.join_requests.count_awaiting_manual().await
    }

    async fn approve_and_notify(&self, request: &JoinRequest) -> Result<Resolution> {
        self.approve(request).await?;
        self.notify(request).await
    }

    async fn approve(&self, request: &JoinRequest) -> Result<()> {
        self.transport
            .approve_join_request(request.user.id, request.chat_id)
            .await?;
        tracing::info!(
            target: "admission",
            user_id = request.user.id,
            chat_id = request.chat_id,
            "join request approved"
        );
        Ok(())
    }

    async fn notify(&self, request: &JoinRequest) -> Result<Resolution> {
        let user = match self.storage.users.get(request.user.id).await? {
            Some(user) => user,
            None => {
                self.storage
                    .users
                    .record_request(&request.user, request.chat_id)
                    .await?
            }
        };
        if user.channel_ids.len() > 1 {
            tracing::debug!(target: "admission", user_id = user.id, "user already in another channel, no welcome");
            return Ok(Resolution::AlreadyMember);
        }

        let Some(message) = self.storage.messages.get(KEY_JOIN_MESSAGE).await? else {
            tracing::warn!(target: "admission", user_id = user.id, "no welcome message configured");
            return Ok(Resolution::NoJoinMessage);
        };

        self.transport.copy_message(user.id, message.source).await?;
        self.pacer.record_sent().await;
        Ok(Resolution::Notified)
    }
}
