//! Background loops that reconcile stored state with Telegram.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::{
    infrastructure::shutdown::ShutdownListener,
    tasks::{admission::Admission, broadcaster::Broadcaster, membership::MembershipSweeper},
};

pub fn spawn_delayed_join_resolver(
    admission: Arc<Admission>,
    interval: Duration,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(target: "reconcile", ?interval, "delayed join resolver started");
        loop {
            if shutdown.is_triggered() {
                break;
            }
            match admission.resolve_due(Utc::now()).await {
                Ok(0) => {}
                Ok(resolved) => {
                    tracing::info!(target: "reconcile", resolved, "delayed join requests approved")
                }
                Err(err) => {
                    tracing::error!(target: "reconcile", error = %err, "failed to load delayed join requests")
                }
            }
            if !shutdown.sleep(interval).await {
                break;
            }
        }
        tracing::info!(target: "reconcile", "delayed join resolver stopped");
    })
}

pub fn spawn_broadcast_dispatcher(
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(target: "reconcile", ?interval, "broadcast dispatcher started");
        loop {
            if shutdown.is_triggered() {
                break;
            }
            if let Err(err) = broadcaster.dispatch_due(Utc::now()).await {
                tracing::error!(target: "reconcile", error = %err, "broadcast dispatch failed");
            }
            if !shutdown.sleep(interval).await {
                break;
            }
        }
        tracing::info!(target: "reconcile", "broadcast dispatcher stopped");
    })
}

pub fn spawn_membership_sweep(
    sweeper: Arc<MembershipSweeper>,
    initial_delay: Duration,
    interval: Duration,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(target: "reconcile", ?interval, "membership sweep scheduled");
        if !shutdown.sleep(initial_delay).await {
            return;
        }
        loop {
            match sweeper.sweep(&shutdown).await {
                Ok(report) => tracing::info!(
                    target: "reconcile",
                    checked = report.checked,
                    changed = report.changed,
                    "membership sweep finished"
                ),
                Err(err) => tracing::error!(target: "reconcile", error = %err, "membership sweep failed"),
            }
            if !shutdown.sleep(interval).await {
                break;
            }
        }
        tracing::info!(target: "reconcile", "membership sweep stopped");
    })
}

/// Approves every manually held request in the background.
pub fn spawn_approve_all(admission: Arc<Admission>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = admission.approve_all_pending().await {
            tracing::error!(target: "reconcile", error = %err, "approve-all failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::delays::KEY_JOIN_DELAY,
        infrastructure::shutdown::Shutdown,
        testing::{join_request, temp_storage, RecordingTransport},
    };

    #[tokio::test]
    async fn resolver_approves_due_requests_and_stops_on_shutdown() {
        let (_dir, storage) = temp_storage().await;
        storage.delays.set(KEY_JOIN_DELAY, 1).await.unwrap();
        let transport = RecordingTransport::new();
        let admission = Arc::new(Admission::new(
            transport.clone(),
            storage.clone(),
            Duration::ZERO,
        ));
        admission
            .receive(&join_request(1, -100), 1, true)
            .await
            .unwrap();

        let (shutdown, listener) = Shutdown::new();
        let handle = spawn_delayed_join_resolver(
            admission.clone(),
            Duration::from_millis(50),
            listener,
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while transport.state().approvals.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(transport.state().approvals, vec![(1, -100)]);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
