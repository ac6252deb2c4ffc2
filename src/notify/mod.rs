// src/notify/mod.rs
//! Chat-platform seam: the narrow send/react/lookup surface the relay needs,
//! plus the Discord REST and gateway clients that implement it.

pub mod discord;
pub mod gateway;
pub mod markers;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::render::{Attachment, Embed, RenderedPost};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("missing permissions: {0}")]
    Forbidden(String),
    #[error("rate limited (retry after {retry_after:.1}s)")]
    RateLimited { retry_after: f64 },
    #[error("platform returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("platform request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected platform payload: {0}")]
    Decode(String),
}

impl PlatformError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, PlatformError::Forbidden(_))
    }

    /// Worth another attempt with the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::RateLimited { .. } | PlatformError::Transport(_) => true,
            PlatformError::Http { status, .. } => *status >= 500,
            PlatformError::Forbidden(_) | PlatformError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub attachment: Option<Attachment>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn post(rendered: RenderedPost) -> Self {
        Self {
            content: None,
            embed: Some(rendered.embed),
            attachment: rendered.attachment,
        }
    }
}

/// Handle of a message the platform accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: u64,
    pub message_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u64,
    pub name: String,
    pub guild_id: Option<u64>,
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A reaction the bot can attach. `handle` is what the platform expects on
/// the wire: `name:id` for custom emoji, the character itself for unicode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionMarker {
    pub name: String,
    pub handle: String,
}

impl ReactionMarker {
    pub fn unicode(symbol: &str) -> Self {
        Self {
            name: symbol.to_string(),
            handle: symbol.to_string(),
        }
    }

    pub fn custom(name: &str, id: &str) -> Self {
        Self {
            name: name.to_string(),
            handle: format!("{name}:{id}"),
        }
    }
}

#[async_trait]
pub trait Reactor: Send + Sync {
    async fn react(&self, message: &SentMessage, marker: &ReactionMarker)
        -> Result<(), PlatformError>;
}

#[async_trait]
pub trait ChatPlatform: Reactor {
    async fn send(
        &self,
        channel_id: u64,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, PlatformError>;

    async fn channel_lookup(&self, channel_id: u64) -> Result<ChannelInfo, PlatformError>;

    /// Custom emoji of a guild as (name, id) pairs.
    async fn guild_markers(&self, guild_id: u64) -> Result<Vec<(String, String)>, PlatformError>;
}

/// Where a cycle's output goes. Both a command invocation and the
/// configured post channel resolve to one of these before the cycle starts.
#[derive(Clone)]
pub struct ReplyTarget {
    info: ChannelInfo,
    platform: Arc<dyn ChatPlatform>,
}

impl ReplyTarget {
    pub fn new(info: ChannelInfo, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { info, platform }
    }

    /// Look the channel up once; an unknown channel falls back to a bare id.
    pub async fn resolve(platform: Arc<dyn ChatPlatform>, channel_id: u64) -> Self {
        let info = match platform.channel_lookup(channel_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(channel = channel_id, error = %e, "channel lookup failed");
                ChannelInfo {
                    id: channel_id,
                    name: channel_id.to_string(),
                    guild_id: None,
                }
            }
        };
        Self { info, platform }
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn guild_id(&self) -> Option<u64> {
        self.info.guild_id
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    pub async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, PlatformError> {
        self.platform.send(self.info.id, message).await
    }

    /// Plain text notice; failures are logged, never returned.
    pub async fn say(&self, text: &str) {
        if let Err(e) = self.send(&OutgoingMessage::text(text)).await {
            tracing::warn!(channel = %self.info, error = %e, "failed to send notice");
        }
    }
}

impl fmt::Debug for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyTarget").field("info", &self.info).finish()
    }
}
