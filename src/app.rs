use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use teloxide::Bot;
use tokio::{task::JoinHandle, time::timeout};

use crate::{
    admin::{handler::BotHandler, session::AdminSession},
    config::AppConfig,
    db::Storage,
    infrastructure::{
        directories::ResolvedPaths, flag_file::AutoAcceptFlag, notifier::notify_admins,
        shutdown::Shutdown,
    },
    tasks::{
        admission::Admission,
        broadcaster::Broadcaster,
        listener::Listener,
        membership::MembershipSweeper,
        reconcile::{
            spawn_broadcast_dispatcher, spawn_delayed_join_resolver, spawn_membership_sweep,
        },
    },
    telegram::{bot::TeloxideTransport, transport::Transport},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct JoinGateApp {
    _paths: ResolvedPaths,
    config: Arc<AppConfig>,
    storage: Storage,
    transport: Arc<dyn Transport>,
    listener: Listener<BotHandler>,
    admission: Arc<Admission>,
    broadcaster: Arc<Broadcaster>,
    sweeper: Arc<MembershipSweeper>,
    shutdown: Shutdown,
}

impl JoinGateApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let storage = Storage::open(&paths.db_path).await?;

        let http_client = Client::builder()
            .user_agent(format!("join-gate/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.engine.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        let mut bot = Bot::with_client(&config.telegram_bot_token, http_client);
        if let Some(api_url) = &config.telegram_api_url {
            bot = bot.set_api_url(api_url.clone());
        }
        let transport: Arc<dyn Transport> = Arc::new(TeloxideTransport::new(bot));

        let flag = AutoAcceptFlag::load(&paths.auto_accept_path)?;
        tracing::info!(auto_accept = flag.enabled(), "auto-accept flag loaded");

        let admission = Arc::new(Admission::new(
            transport.clone(),
            storage.clone(),
            config.engine.notify_pause,
        ));
        let sweeper = Arc::new(MembershipSweeper::new(transport.clone(), storage.clone()));
        let broadcaster = Arc::new(Broadcaster::new(
            transport.clone(),
            storage.clone(),
            sweeper.clone(),
            config.engine.broadcast_pause,
        ));

        let handler = BotHandler::new(
            transport.clone(),
            storage.clone(),
            admission.clone(),
            config.clone(),
            AdminSession::new(flag),
            config.timezone,
        );
        let listener = Listener::new(transport.clone(), handler, config.engine.clone());

        Ok(Self {
            _paths: paths,
            config,
            storage,
            transport,
            listener,
            admission,
            broadcaster,
            sweeper,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let JoinGateApp {
            _paths: _,
            config,
            storage,
            transport,
            listener,
            admission,
            broadcaster,
            sweeper,
            shutdown,
        } = self;
        let engine = config.engine.clone();

        tracing::info!(admins = config.admin_user_ids.len(), "join gate starting");
        notify_admins(transport.as_ref(), &config, "Bot started").await;

        let background = vec![
            (
                "delayed-join",
                spawn_delayed_join_resolver(
                    admission,
                    engine.delayed_join_interval,
                    shutdown.subscribe(),
                ),
            ),
            (
                "broadcast",
                spawn_broadcast_dispatcher(
                    broadcaster,
                    engine.broadcast_poll_interval,
                    shutdown.subscribe(),
                ),
            ),
            (
                "membership",
                spawn_membership_sweep(
                    sweeper,
                    engine.membership_initial_delay,
                    engine.membership_interval,
                    shutdown.subscribe(),
                ),
            ),
        ];

        let mut shutdown_listener = shutdown.subscribe();
        let mut listener_handle = listener.spawn(shutdown.subscribe());
        let mut listener_finished = false;

        tokio::select! {
            _ = shutdown_listener.notified() => {
                tracing::info!("shutdown signal received");
            }
            res = &mut listener_handle => {
                listener_finished = true;
                if let Err(err) = res {
                    tracing::error!(?err, "listener task ended abnormally");
                }
            }
        }

        shutdown.trigger();

        if !listener_finished {
            stop_task("listener", listener_handle).await;
        }
        for (name, handle) in background {
            stop_task(name, handle).await;
        }

        notify_admins(transport.as_ref(), &config, "Bot stopped").await;
        if timeout(SHUTDOWN_GRACE, storage.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "storage did not close within {:?}",
                SHUTDOWN_GRACE
            );
        }
        tracing::info!("join gate stopped");
        Ok(())
    }
}

async fn stop_task(name: &str, mut handle: JoinHandle<()>) {
    let grace = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(grace);
    tokio::select! {
        res = &mut handle => {
            if let Err(err) = res {
                if err.is_panic() {
                    tracing::error!(task = name, "task panicked");
                }
            }
        }
        _ = &mut grace => {
            tracing::warn!(task = name, "task did not stop within {:?}, aborting", SHUTDOWN_GRACE);
            handle.abort();
        }
    }
}
