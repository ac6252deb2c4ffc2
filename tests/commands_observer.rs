// tests/commands_observer.rs
mod common;

use common::{link_item, FakePlatform, FixedCompositor, StaticSource, GUILD, POST_CHANNEL};
use reddit_discord_relay::commands::{CommandRouter, GREETING, NOT_AUTHORIZED};
use reddit_discord_relay::ingest::PostMonitor;
use reddit_discord_relay::notify::gateway::InboundMessage;
use reddit_discord_relay::observer::ReactionObserver;
use reddit_discord_relay::poller::{CycleOutcome, Poller, CHECKING_NOTICE};
use reddit_discord_relay::publish::Publisher;
use reddit_discord_relay::render::Renderer;
use reddit_discord_relay::tracking::{LocalFiles, Tracker};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn message(channel_id: u64, content: &str) -> InboundMessage {
    InboundMessage {
        channel_id,
        guild_id: Some(GUILD),
        message_id: 500,
        author_id: 42,
        author_is_bot: false,
        content: content.into(),
        attachment_count: 0,
        embed_urls: vec![],
        embed_count: 0,
    }
}

struct Rig {
    router: CommandRouter,
    platform: Arc<FakePlatform>,
    source: Arc<StaticSource>,
    _dir: tempfile::TempDir,
}

async fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(FakePlatform::with_emoji(&["FIRE", "GreenPepper"]));
    let source = Arc::new(StaticSource::new(vec![link_item("a", "First")]));
    let poller = Arc::new(Poller::new(
        PostMonitor::new(source.clone(), vec!["testsub".into()], &[], 5),
        Arc::new(Tracker::new(
            LocalFiles::new(dir.path().join("seen.txt"), dir.path().join("posted.csv")),
            None,
        )),
        Publisher::new(Renderer::new(Arc::new(FixedCompositor(None)))),
        vec!["FIRE".into()],
    ));
    poller.start().await;

    let router = CommandRouter::new("!", POST_CHANNEL, platform.clone(), poller).with_observer(
        ReactionObserver::new(
            POST_CHANNEL,
            platform.clone(),
            vec!["FIRE".into(), "GreenPepper".into(), "Unknown".into()],
        ),
    );
    Rig {
        router,
        platform,
        source,
        _dir: dir,
    }
}

#[tokio::test]
async fn hello_greets_in_the_invoking_channel() {
    let r = rig().await;
    r.router.dispatch(&message(77, "!hello")).await;
    let sent = r.platform.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 77);
    assert_eq!(sent[0].1.content.as_deref(), Some(GREETING));
}

#[tokio::test]
async fn checknow_outside_post_channel_is_rejected_without_side_effects() {
    let r = rig().await;
    let out = r.router.check_now(&message(77, "!checknow")).await;
    assert!(out.is_none());
    assert_eq!(r.platform.texts(), vec![NOT_AUTHORIZED.to_string()]);
    assert!(r.platform.posted_titles().is_empty());
    assert_eq!(r.source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn checknow_in_post_channel_runs_a_cycle() {
    let r = rig().await;
    let out = r.router.check_now(&message(POST_CHANNEL, "!checknow")).await;
    assert!(matches!(out, Some(CycleOutcome::Completed(_))));
    assert_eq!(r.platform.texts()[0], CHECKING_NOTICE);
    assert_eq!(r.platform.posted_titles(), vec!["First"]);
}

#[tokio::test]
async fn bots_cannot_trigger_commands() {
    let r = rig().await;
    let mut m = message(POST_CHANNEL, "!checknow");
    m.author_is_bot = true;
    r.router.dispatch(&m).await;
    assert!(r.platform.sent.lock().unwrap().is_empty());
    assert_eq!(r.source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn media_in_post_channel_gets_markers() {
    let r = rig().await;
    let mut m = message(POST_CHANNEL, "No gif here");
    m.attachment_count = 1;
    r.router.dispatch(&m).await;

    let reactions = r.platform.reactions.lock().unwrap();
    let handles: Vec<&str> = reactions.iter().map(|(_, h)| h.as_str()).collect();
    assert_eq!(handles, vec!["FIRE:1", "GreenPepper:2"]);
    assert!(reactions.iter().all(|(id, _)| *id == 500));
}

#[tokio::test]
async fn gifs_and_other_channels_are_ignored() {
    let r = rig().await;

    let mut gif = message(POST_CHANNEL, "https://media.example/cat.gif");
    gif.attachment_count = 1;
    r.router.dispatch(&gif).await;

    let mut tenor = message(POST_CHANNEL, "");
    tenor.embed_urls = vec!["https://tenor.com/view/abc".into()];
    tenor.embed_count = 1;
    r.router.dispatch(&tenor).await;

    let mut elsewhere = message(77, "pic");
    elsewhere.attachment_count = 1;
    r.router.dispatch(&elsewhere).await;

    let plain_text = message(POST_CHANNEL, "just chatting");
    r.router.dispatch(&plain_text).await;

    assert!(r.platform.reactions.lock().unwrap().is_empty());
}
