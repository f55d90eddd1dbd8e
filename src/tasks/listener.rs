use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::{
    config::EngineConfig,
    domain::{Event, EventKind},
    infrastructure::shutdown::ShutdownListener,
    telegram::{classify::classify, transport::Transport},
    tasks::lost::{LostEvents, Tracked},
};

/// Consumer of classified events. Errors trigger the listener's retries.
#[async_trait]
pub trait EventHandler: Send {
    async fn handle(&mut self, event: &Event) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Idle,
    Processed(usize),
    Failed,
}

/// Capped exponential wait between failed fetches.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        wait
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Long-polls for updates, advances the offset past every fetched batch and
/// hands each event to the handler with bounded retries.
pub struct Listener<H> {
    transport: Arc<dyn Transport>,
    handler: H,
    engine: EngineConfig,
    offset: i64,
    lost: LostEvents,
    backoff: Backoff,
}

impl<H: EventHandler + 'static> Listener<H> {
    pub fn new(transport: Arc<dyn Transport>, handler: H, engine: EngineConfig) -> Self {
        let backoff = Backoff::new(engine.fetch_backoff_initial, engine.fetch_backoff_max);
        Self {
            transport,
            handler,
            engine,
            offset: 0,
            lost: LostEvents::new(),
            backoff,
        }
    }

    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: ShutdownListener) {
        tracing::info!(target: "listener", batch = self.engine.batch_size, "listener started");
        loop {
            if shutdown.is_triggered() {
                break;
            }
            let wait = match self.poll_once(&mut shutdown).await {
                Poll::Processed(_) => continue,
                Poll::Idle => self.engine.idle_poll_delay,
                Poll::Failed => self.backoff.next(),
            };
            if !shutdown.sleep(wait).await {
                break;
            }
        }
        tracing::info!(
            target: "listener",
            offset = self.offset,
            lost = self.lost.len(),
            "listener stopped"
        );
    }

    /// Fetches one batch and handles it. Stops between events, and during a
    /// retry wait, once shutdown is signalled.
    pub async fn poll_once(&mut self, shutdown: &mut ShutdownListener) -> Poll {
        let updates = match self
            .transport
            .fetch_updates(self.offset, self.engine.batch_size)
            .await
        {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(
                    target: "listener",
                    error = %err,
                    offset = self.offset,
                    "failed to fetch updates"
                );
                return Poll::Failed;
            }
        };
        self.backoff.reset();

        if updates.is_empty() {
            return Poll::Idle;
        }
        if let Some(max_id) = updates.iter().map(|update| update.update_id).max() {
            self.offset = self.offset.max(max_id + 1);
        }

        let events: Vec<Event> = updates.iter().map(classify).collect();
        let total = events.len();
        tracing::debug!(target: "listener", total, offset = self.offset, "received updates");
        if !self.handle_events(events, shutdown).await {
            return Poll::Processed(total);
        }

        if self.lost.retry_due() {
            tracing::info!(target: "listener", lost = self.lost.len(), "retrying lost events");
            let lost = self.lost.snapshot();
            self.handle_events(lost, shutdown).await;
        }
        Poll::Processed(total)
    }

    /// Returns `false` when shutdown cut the batch short.
    async fn handle_events(
        &mut self,
        events: Vec<Event>,
        shutdown: &mut ShutdownListener,
    ) -> bool {
        let total = events.len();
        for (handled, event) in events.into_iter().enumerate() {
            if shutdown.is_triggered() || !self.handle_with_retry(event, shutdown).await {
                tracing::info!(
                    target: "listener",
                    handled,
                    skipped = total - handled,
                    "shutdown during batch"
                );
                return false;
            }
        }
        true
    }

    /// Returns `false` when shutdown interrupted the retries.
    async fn handle_with_retry(&mut self, event: Event, shutdown: &mut ShutdownListener) -> bool {
        tracing::trace!(
            target: "listener",
            update_id = event.update_id,
            kind = %event.event_type(),
            text = event.text(),
            "handling event"
        );
        let attempts = self.engine.process_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.handler.handle(&event).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        target: "listener",
                        error = %err,
                        attempt,
                        update_id = event.update_id,
                        kind = %event.event_type(),
                        "event handling failed"
                    );
                    last_error = Some(err);
                    if attempt < attempts && !shutdown.sleep(self.engine.retry_delay).await {
                        return false;
                    }
                }
            }
        }

        let Some(err) = last_error else {
            if self.lost.resolve(event.update_id) {
                tracing::info!(target: "listener", update_id = event.update_id, "lost event recovered");
            }
            return true;
        };

        if !matches!(event.kind, EventKind::JoinRequest(_)) {
            tracing::error!(
                target: "listener",
                error = %err,
                update_id = event.update_id,
                kind = %event.event_type(),
                "dropping event after retries"
            );
            return true;
        }

        let update_id = event.update_id;
        match self.lost.track(event) {
            Tracked::Added => {
                tracing::warn!(target: "listener", update_id, lost = self.lost.len(), "join request buffered for retry")
            }
            Tracked::AlreadyTracked => {}
            Tracked::Overflowed { dropped } => {
                tracing::error!(target: "listener", dropped, "lost event buffer overflowed, cleared")
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use anyhow::anyhow;

    use super::*;
    use crate::{
        infrastructure::shutdown::Shutdown,
        tasks::lost::LOST_EVENTS_RETRY_EVERY,
        telegram::update::{RawChat, RawJoinRequest, RawMessage, RawUpdate, RawUser},
        testing::{fast_engine, RecordingTransport},
    };

    #[derive(Default)]
    struct ScriptedHandler {
        always_fail: HashSet<i64>,
        fail_times: HashMap<i64, u32>,
        calls: Vec<i64>,
        handled: Vec<i64>,
        stop_on_failure: Option<Shutdown>,
    }

    #[async_trait]
    impl EventHandler for ScriptedHandler {
        async fn handle(&mut self, event: &Event) -> Result<()> {
            self.calls.push(event.update_id);
            if self.always_fail.contains(&event.update_id) {
                if let Some(shutdown) = &self.stop_on_failure {
                    shutdown.trigger();
                }
                return Err(anyhow!("scripted failure"));
            }
            if let Some(left) = self.fail_times.get_mut(&event.update_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(anyhow!("scripted failure"));
                }
            }
            self.handled.push(event.update_id);
            Ok(())
        }
    }

    fn join_update(update_id: i64, user_id: i64) -> RawUpdate {
        RawUpdate {
            update_id,
            chat_join_request: Some(RawJoinRequest {
                from: RawUser {
                    id: user_id,
                    first_name: "joiner".into(),
                    ..Default::default()
                },
                chat: RawChat { id: -100 },
            }),
            ..Default::default()
        }
    }

    fn text_update(update_id: i64) -> RawUpdate {
        RawUpdate {
            update_id,
            message: Some(RawMessage {
                message_id: 1,
                from: None,
                chat: RawChat { id: 7 },
                text: Some("hi".into()),
            }),
            ..Default::default()
        }
    }

    fn listener(
        transport: &Arc<RecordingTransport>,
        handler: ScriptedHandler,
    ) -> Listener<ScriptedHandler> {
        Listener::new(transport.clone(), handler, fast_engine())
    }

    #[tokio::test]
    async fn offset_moves_past_the_highest_update() {
        let transport = RecordingTransport::new();
        let (_shutdown, mut stop) = Shutdown::new();
        transport
            .state()
            .scripted_updates
            .push_back(Ok(vec![text_update(3), text_update(5), text_update(4)]));
        let mut listener = listener(&transport, ScriptedHandler::default());

        assert_eq!(listener.poll_once(&mut stop).await, Poll::Processed(3));
        assert_eq!(listener.offset, 6);
        assert_eq!(listener.handler.handled, vec![3, 5, 4]);

        assert_eq!(listener.poll_once(&mut stop).await, Poll::Idle);
        assert_eq!(transport.state().fetch_offsets, vec![0, 6]);
    }

    #[tokio::test]
    async fn failing_join_request_is_buffered_once() {
        let transport = RecordingTransport::new();
        let (_shutdown, mut stop) = Shutdown::new();
        transport
            .state()
            .scripted_updates
            .push_back(Ok(vec![join_update(10, 1)]));
        let mut handler = ScriptedHandler::default();
        handler.always_fail.insert(10);
        let mut listener = listener(&transport, handler);

        listener.poll_once(&mut stop).await;
        assert_eq!(listener.handler.calls.len(), 3);
        assert!(listener.lost.contains(10));

        let again = listener.lost.snapshot();
        listener.handle_events(again, &mut stop).await;
        assert_eq!(listener.lost.len(), 1);
    }

    #[tokio::test]
    async fn failing_message_is_dropped_not_buffered() {
        let transport = RecordingTransport::new();
        let (_shutdown, mut stop) = Shutdown::new();
        transport
            .state()
            .scripted_updates
            .push_back(Ok(vec![text_update(11)]));
        let mut handler = ScriptedHandler::default();
        handler.always_fail.insert(11);
        let mut listener = listener(&transport, handler);

        listener.poll_once(&mut stop).await;
        assert!(listener.lost.is_empty());
        assert_eq!(listener.offset, 12);
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_attempts() {
        let transport = RecordingTransport::new();
        let (_shutdown, mut stop) = Shutdown::new();
        transport
            .state()
            .scripted_updates
            .push_back(Ok(vec![join_update(20, 2)]));
        let mut handler = ScriptedHandler::default();
        handler.fail_times.insert(20, 2);
        let mut listener = listener(&transport, handler);

        listener.poll_once(&mut stop).await;
        assert_eq!(listener.handler.handled, vec![20]);
        assert!(listener.lost.is_empty());
    }

    #[tokio::test]
    async fn full_retry_window_drains_recovered_events() {
        let transport = RecordingTransport::new();
        let (_shutdown, mut stop) = Shutdown::new();
        let batch: Vec<RawUpdate> = (0..LOST_EVENTS_RETRY_EVERY as i64)
            .map(|id| join_update(id, id + 1))
            .collect();
        transport.state().scripted_updates.push_back(Ok(batch));
        let mut handler = ScriptedHandler::default();
        for id in 0..LOST_EVENTS_RETRY_EVERY as i64 {
            handler.fail_times.insert(id, 3);
        }
        let mut listener = listener(&transport, handler);

        listener.poll_once(&mut stop).await;
        assert!(listener.lost.is_empty());
        assert_eq!(listener.handler.handled.len(), LOST_EVENTS_RETRY_EVERY);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_offset() {
        let transport = RecordingTransport::new();
        let (_shutdown, mut stop) = Shutdown::new();
        transport
            .state()
            .scripted_updates
            .push_back(Err("connection reset".into()));
        let mut listener = listener(&transport, ScriptedHandler::default());

        assert_eq!(listener.poll_once(&mut stop).await, Poll::Failed);
        assert_eq!(listener.offset, 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_retry_wait_and_batch() {
        let transport = RecordingTransport::new();
        transport
            .state()
            .scripted_updates
            .push_back(Ok(vec![join_update(30, 3), join_update(31, 4)]));
        let (shutdown, mut stop) = Shutdown::new();
        let mut handler = ScriptedHandler::default();
        handler.always_fail.insert(30);
        handler.stop_on_failure = Some(shutdown);
        let engine = EngineConfig {
            retry_delay: Duration::from_secs(3600),
            ..fast_engine()
        };
        let mut listener = Listener::new(transport.clone(), handler, engine);

        let poll = tokio::time::timeout(Duration::from_secs(5), listener.poll_once(&mut stop))
            .await
            .expect("poll returns promptly after shutdown");
        assert_eq!(poll, Poll::Processed(2));
        assert_eq!(listener.handler.calls, vec![30]);
        assert_eq!(listener.offset, 32);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        let waits: Vec<u128> = (0..4).map(|_| backoff.next().as_millis()).collect();
        assert_eq!(waits, vec![500, 1000, 2000, 2000]);
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(500));
    }
}
