// tests/common/mod.rs
// Hand-written fakes for the chat platform, source and compositor.
#![allow(dead_code)]

use async_trait::async_trait;
use reddit_discord_relay::ingest::types::{RawItem, SourceError, SourceProvider};
use reddit_discord_relay::notify::{
    ChannelInfo, ChatPlatform, OutgoingMessage, PlatformError, ReactionMarker, Reactor,
    ReplyTarget, SentMessage,
};
use reddit_discord_relay::render::Compositor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const POST_CHANNEL: u64 = 1000;
pub const GUILD: u64 = 1;

#[derive(Default)]
pub struct FakePlatform {
    pub sent: Mutex<Vec<(u64, OutgoingMessage)>>,
    pub reactions: Mutex<Vec<(u64, String)>>,
    /// Embed titles whose send is rejected with a permission error.
    pub forbid_titles: Mutex<Vec<String>>,
    pub forbid_reactions: bool,
    pub emoji: Vec<(String, String)>,
    pub next_id: AtomicU64,
}

impl FakePlatform {
    pub fn with_emoji(names: &[&str]) -> Self {
        Self {
            emoji: names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.to_string(), (i + 1).to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, m)| m.content.clone())
            .collect()
    }

    pub fn posted_titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, m)| m.embed.as_ref().map(|e| e.title.clone()))
            .collect()
    }
}

#[async_trait]
impl Reactor for FakePlatform {
    async fn react(&self, message: &SentMessage, marker: &ReactionMarker) -> Result<(), PlatformError> {
        if self.forbid_reactions {
            return Err(PlatformError::Forbidden("Missing Permissions".into()));
        }
        self.reactions
            .lock()
            .unwrap()
            .push((message.message_id, marker.handle.clone()));
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn send(&self, channel_id: u64, message: &OutgoingMessage) -> Result<SentMessage, PlatformError> {
        if let Some(e) = &message.embed {
            if self.forbid_titles.lock().unwrap().contains(&e.title) {
                return Err(PlatformError::Forbidden("Missing Access".into()));
            }
        }
        self.sent.lock().unwrap().push((channel_id, message.clone()));
        Ok(SentMessage {
            channel_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn channel_lookup(&self, id: u64) -> Result<ChannelInfo, PlatformError> {
        Ok(ChannelInfo {
            id,
            name: "posts".into(),
            guild_id: Some(GUILD),
        })
    }

    async fn guild_markers(&self, _guild_id: u64) -> Result<Vec<(String, String)>, PlatformError> {
        Ok(self.emoji.clone())
    }
}

pub fn target(platform: Arc<FakePlatform>) -> ReplyTarget {
    ReplyTarget::new(
        ChannelInfo {
            id: POST_CHANNEL,
            name: "posts".into(),
            guild_id: Some(GUILD),
        },
        platform,
    )
}

/// Compositor returning a fixed result.
pub struct FixedCompositor(pub Option<Vec<u8>>);

#[async_trait]
impl Compositor for FixedCompositor {
    async fn compose(&self, _urls: &[String]) -> Option<Vec<u8>> {
        self.0.clone()
    }
}

/// Source that serves the same listing every time.
#[derive(Default)]
pub struct StaticSource {
    pub items: Mutex<Vec<RawItem>>,
    pub calls: AtomicU64,
}

impl StaticSource {
    pub fn new(items: Vec<RawItem>) -> Self {
        Self {
            items: Mutex::new(items),
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn fetch(&self, _source: &str, _filter: Option<&str>, limit: usize) -> Result<Vec<RawItem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.lock().unwrap().iter().take(limit).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Parks a caller until the test releases it. `entered` fires once the
/// caller is parked, so the test knows exactly where the other side is.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    pub async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// `StaticSource` that waits at the gate before answering.
pub struct GatedSource {
    pub inner: Arc<StaticSource>,
    pub gate: Arc<Gate>,
}

#[async_trait]
impl SourceProvider for GatedSource {
    async fn fetch(&self, source: &str, filter: Option<&str>, limit: usize) -> Result<Vec<RawItem>, SourceError> {
        self.gate.pass().await;
        self.inner.fetch(source, filter, limit).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Compositor that waits at the gate, then returns a fixed image.
pub struct GatedCompositor(pub Arc<Gate>);

#[async_trait]
impl Compositor for GatedCompositor {
    async fn compose(&self, _urls: &[String]) -> Option<Vec<u8>> {
        self.0.pass().await;
        Some(b"png".to_vec())
    }
}

pub fn gallery_item(id: &str, title: &str) -> RawItem {
    RawItem {
        id: id.into(),
        body: format!(
            "**Title** {title}\n**Author** someone\n**Link** http://g.example/{id} **IMAGES** http://i.example/{id}/1.png"
        ),
        url: format!("http://g.example/{id}"),
        is_self: false,
        is_gallery: true,
        is_video: false,
    }
}

pub fn link_item(id: &str, title: &str) -> RawItem {
    RawItem {
        id: id.into(),
        body: format!("**Title** {title}\n**Author** someone\n**Link** http://i.example/{id}.jpg"),
        url: format!("http://i.example/{id}.jpg"),
        is_self: false,
        is_gallery: false,
        is_video: false,
    }
}

pub fn self_item(id: &str) -> RawItem {
    RawItem {
        id: id.into(),
        body: "**Title** Just text\n**Author** someone\n**Text** hello".into(),
        url: String::new(),
        is_self: true,
        is_gallery: false,
        is_video: false,
    }
}
