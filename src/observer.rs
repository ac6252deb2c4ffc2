// src/observer.rs
//! Reacts to media posted in the relay channel by anyone, independent of
//! the polling cycle.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::notify::gateway::InboundMessage;
use crate::notify::markers::{add_reactions, try_resolve_markers};
use crate::notify::{ChannelInfo, ChatPlatform, ReactionMarker, SentMessage};

static GIF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\.gif\b|giphy\.com|tenor\.com)").expect("static gif regex")
});

pub fn mentions_gif(msg: &InboundMessage) -> bool {
    GIF_RE.is_match(&msg.content) || msg.embed_urls.iter().any(|u| GIF_RE.is_match(u))
}

pub struct ReactionObserver {
    channel_id: u64,
    platform: Arc<dyn ChatPlatform>,
    marker_names: Vec<String>,
    markers: OnceCell<Vec<ReactionMarker>>,
}

impl ReactionObserver {
    pub fn new(channel_id: u64, platform: Arc<dyn ChatPlatform>, marker_names: Vec<String>) -> Self {
        Self {
            channel_id,
            platform,
            marker_names,
            markers: OnceCell::new(),
        }
    }

    /// Media from a human in the watched channel that is not a GIF.
    pub fn wants(&self, msg: &InboundMessage) -> bool {
        msg.channel_id == self.channel_id
            && !msg.author_is_bot
            && (msg.attachment_count > 0 || msg.embed_count > 0)
            && !mentions_gif(msg)
    }

    /// Returns the number of markers attached. Markers are resolved on first
    /// use and cached; a failed lookup is retried on the next message.
    pub async fn observe(&self, msg: &InboundMessage) -> usize {
        if !self.wants(msg) {
            return 0;
        }
        let markers = match self
            .markers
            .get_or_try_init(|| {
                try_resolve_markers(self.platform.as_ref(), msg.guild_id, &self.marker_names)
            })
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    message = msg.message_id,
                    error = %e,
                    "could not list guild emoji; media left unmarked"
                );
                return 0;
            }
        };

        let channel = ChannelInfo {
            id: msg.channel_id,
            name: msg.channel_id.to_string(),
            guild_id: msg.guild_id,
        };
        let sent = SentMessage {
            channel_id: msg.channel_id,
            message_id: msg.message_id,
        };
        add_reactions(self.platform.as_ref(), &channel, &sent, markers)
            .await
            .added
    }
}
