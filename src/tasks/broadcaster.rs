use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::{
    db::Storage,
    domain::{BroadcastJob, BroadcastReport},
    tasks::membership::MembershipSweeper,
    telegram::transport::Transport,
};

/// Delivery attempts between two pauses.
const BROADCAST_BURST: usize = 20;

/// Fans the scheduled message out to every known user.
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    storage: Storage,
    sweeper: Arc<MembershipSweeper>,
    pause: Duration,
}

impl Broadcaster {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Storage,
        sweeper: Arc<MembershipSweeper>,
        pause: Duration,
    ) -> Self {
        Self {
            transport,
            storage,
            sweeper,
            pause,
        }
    }

    /// Runs the broadcast if one is due, then removes the job.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<Option<BroadcastReport>> {
        let Some(job) = self.storage.messages.due_broadcast(now).await? else {
            return Ok(None);
        };
        tracing::info!(
            target: "broadcast",
            message_id = job.source.message_id,
            scheduled_at = %job.scheduled_at,
            "broadcast started"
        );

        let report = self.deliver(&job).await?;
        if !self.storage.messages.delete_job(&job).await? {
            tracing::info!(target: "broadcast", "broadcast was replaced during delivery, keeping the new one");
        }
        tracing::info!(
            target: "broadcast",
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "broadcast finished"
        );
        Ok(Some(report))
    }

    /// Copies the job's message to every user who has not received it yet.
    /// Individual failures are logged and do not stop the fan-out.
    pub async fn deliver(&self, job: &BroadcastJob) -> Result<BroadcastReport> {
        let users = self.storage.users.all().await?;
        let mut report = BroadcastReport::default();
        let mut recipients = Vec::with_capacity(users.len());

        for mut user in users {
            if !user.channel_ids.is_empty() {
                if let Err(err) = self.sweeper.refresh(&mut user).await {
                    tracing::warn!(target: "broadcast", error = %err, user_id = user.id, "membership refresh failed");
                }
            }
            recipients.push(user.id);

            if user.last_delivered_message_id == Some(job.source.message_id) {
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match self.transport.copy_message(user.id, job.source).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "broadcast",
                        error = %err,
                        user_id = user.id,
                        user = %user.display_name(),
                        "delivery failed"
                    );
                }
            }
            if report.attempted % BROADCAST_BURST == 0 {
                sleep(self.pause).await;
            }
        }

        if let Err(err) = self
            .storage
            .users
            .mark_delivered(job.source.message_id, &recipients)
            .await
        {
            tracing::error!(target: "broadcast", error = %err, "failed to record deliveries");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        db::messages::{KEY_BROADCAST, KEY_LAST_BROADCAST},
        domain::MessageRef,
        testing::{profile, temp_storage, RecordingTransport},
    };

    const SOURCE: MessageRef = MessageRef {
        chat_id: 7,
        message_id: 42,
    };

    fn broadcaster(storage: &Storage, transport: &Arc<RecordingTransport>) -> Broadcaster {
        let sweeper = Arc::new(MembershipSweeper::new(transport.clone(), storage.clone()));
        Broadcaster::new(transport.clone(), storage.clone(), sweeper, Duration::ZERO)
    }

    async fn schedule_in_past(storage: &Storage) {
        let past = Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap();
        for key in [KEY_BROADCAST, KEY_LAST_BROADCAST] {
            storage.messages.save(key, SOURCE).await.unwrap();
            storage.messages.schedule(key, past).await.unwrap();
        }
    }

    #[tokio::test]
    async fn due_broadcast_reaches_everyone_and_is_removed() {
        let (_dir, storage) = temp_storage().await;
        for id in 1..=3 {
            storage.users.record_request(&profile(id), -100).await.unwrap();
        }
        storage.users.mark_delivered(42, &[2]).await.unwrap();
        schedule_in_past(&storage).await;

        let transport = RecordingTransport::new();
        let report = broadcaster(&storage, &transport)
            .dispatch_due(Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(transport.state().copies, vec![(1, SOURCE), (3, SOURCE)]);
        assert!(storage.messages.get(KEY_BROADCAST).await.unwrap().is_none());
        assert!(storage.messages.get(KEY_LAST_BROADCAST).await.unwrap().is_some());
        assert_eq!(storage.users.count_delivered(42).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rerun_of_same_job_sends_nothing_new() {
        let (_dir, storage) = temp_storage().await;
        storage.users.record_request(&profile(1), -100).await.unwrap();
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(&storage, &transport);
        let job = BroadcastJob {
            source: SOURCE,
            scheduled_at: Utc::now(),
        };

        broadcaster.deliver(&job).await.unwrap();
        let second = broadcaster.deliver(&job).await.unwrap();
        assert_eq!(second.attempted, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(transport.state().copies.len(), 1);
    }

    #[tokio::test]
    async fn failures_do_not_abort_fan_out() {
        let (_dir, storage) = temp_storage().await;
        for id in 1..=3 {
            storage.users.record_request(&profile(id), -100).await.unwrap();
        }
        schedule_in_past(&storage).await;
        let transport = RecordingTransport::new();
        transport.state().fail_copies_to.insert(2);
        transport.state().non_members.insert((3, -100));

        let report = broadcaster(&storage, &transport)
            .dispatch_due(Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 2);

        let departed = storage.users.get(3).await.unwrap().unwrap();
        assert!(departed.channel_ids.is_empty());
        assert!(departed.left_channel_ids.contains(&-100));
    }

    #[tokio::test]
    async fn nothing_due_is_a_no_op() {
        let (_dir, storage) = temp_storage().await;
        storage.messages.save(KEY_BROADCAST, SOURCE).await.unwrap();
        let transport = RecordingTransport::new();
        assert!(broadcaster(&storage, &transport)
            .dispatch_due(Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(storage.messages.get(KEY_BROADCAST).await.unwrap().is_some());
    }
}
