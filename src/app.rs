// src/app.rs
//! Process wiring: build the collaborators from settings, start the timer
//! loop and the gateway listener, wait for Ctrl-C, then shut down in order.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::commands::CommandRouter;
use crate::config::Settings;
use crate::ingest::providers::reddit::RedditProvider;
use crate::ingest::PostMonitor;
use crate::metrics::{describe_relay_metrics, Metrics};
use crate::notify::discord::DiscordClient;
use crate::notify::gateway::GatewayListener;
use crate::notify::{ChatPlatform, ReplyTarget};
use crate::observer::ReactionObserver;
use crate::poller::Poller;
use crate::publish::Publisher;
use crate::render::mosaic::MosaicCompositor;
use crate::render::Renderer;
use crate::retry::RetryPolicy;
use crate::tracking::{LocalFiles, RemoteStore, SupabaseStore, Tracker, TrackingStore};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub async fn run(settings: Settings) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    match &settings.metrics_addr {
        Some(addr) => {
            let metrics = Metrics::init()?;
            let addr = addr.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = metrics.serve(&addr, rx).await {
                    tracing::error!(error = %e, "metrics endpoint failed");
                }
            });
        }
        None => describe_relay_metrics(),
    }

    let retry = RetryPolicy::new(settings.max_retries, RETRY_BASE_DELAY);
    let discord = DiscordClient::new(settings.discord_token.clone()).with_retry(retry);
    let platform: Arc<dyn ChatPlatform> = Arc::new(discord.clone());

    let provider = Arc::new(RedditProvider::new(settings.reddit.clone()));
    let monitor = PostMonitor::new(
        provider,
        settings.subreddits.clone(),
        &settings.flairs,
        settings.post_limit,
    )
    .with_retry(retry);

    let remote = settings
        .supabase
        .as_ref()
        .map(|s| Arc::new(SupabaseStore::new(s)) as Arc<dyn RemoteStore>);
    if remote.is_none() {
        tracing::info!("no remote store configured; tracking in local files");
    }
    let store: Arc<dyn TrackingStore> = Arc::new(Tracker::new(
        LocalFiles::new(&settings.seen_path, &settings.published_path),
        remote,
    ));

    let renderer = Renderer::new(Arc::new(MosaicCompositor::new()));
    let poller = Arc::new(Poller::new(
        monitor,
        store,
        Publisher::new(renderer),
        settings.reaction_markers.clone(),
    ));
    poller.start().await;

    let target = ReplyTarget::resolve(platform.clone(), settings.post_channel).await;
    tracing::info!(
        channel = %target.info(),
        interval = ?settings.interval,
        sources = ?settings.subreddits,
        "relay started"
    );
    let timer = poller
        .clone()
        .spawn(settings.interval, target, shutdown_rx.clone());

    let router = Arc::new(
        CommandRouter::new(
            settings.command_prefix.clone(),
            settings.post_channel,
            platform.clone(),
            poller.clone(),
        )
        .with_observer(ReactionObserver::new(
            settings.post_channel,
            platform,
            settings.reaction_markers.clone(),
        )),
    );
    let listener = GatewayListener::new(discord);
    let gateway_rx = shutdown_rx.clone();
    let gateway = tokio::spawn(async move { listener.run_forever(router, gateway_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = poller.shutdown(SHUTDOWN_GRACE).await {
        tracing::error!(error = %e, "could not flush tracking state");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, timer).await.is_err() {
        tracing::warn!("timer loop did not stop in time");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, gateway).await.is_err() {
        tracing::warn!("gateway listener did not stop in time");
    }
    Ok(())
}
