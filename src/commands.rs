// src/commands.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::notify::gateway::{InboundHandler, InboundMessage};
use crate::notify::{ChannelInfo, ChatPlatform, ReplyTarget};
use crate::observer::ReactionObserver;
use crate::poller::{CycleOutcome, Poller, Trigger};

pub const GREETING: &str = "Hello I am a bot.";
pub const NOT_AUTHORIZED: &str = "I'm not authorized to publish in this channel.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello,
    CheckNow,
    Unknown(String),
}

/// `None` when the text is not addressed to the bot at all.
pub fn parse_command(prefix: &str, content: &str) -> Option<Command> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    let name = rest.split_whitespace().next()?;
    Some(match name {
        "hello" => Command::Hello,
        "checknow" => Command::CheckNow,
        other => Command::Unknown(other.to_string()),
    })
}

/// Routes gateway messages: prefixed commands first, everything else to the
/// reaction observer.
pub struct CommandRouter {
    prefix: String,
    post_channel: u64,
    platform: Arc<dyn ChatPlatform>,
    poller: Arc<Poller>,
    observer: Option<ReactionObserver>,
}

impl CommandRouter {
    pub fn new(
        prefix: impl Into<String>,
        post_channel: u64,
        platform: Arc<dyn ChatPlatform>,
        poller: Arc<Poller>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            post_channel,
            platform,
            poller,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ReactionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn reply_target(&self, msg: &InboundMessage) -> ReplyTarget {
        ReplyTarget::new(
            ChannelInfo {
                id: msg.channel_id,
                name: msg.channel_id.to_string(),
                guild_id: msg.guild_id,
            },
            self.platform.clone(),
        )
    }

    /// Manual cycle, only from the configured post channel.
    pub async fn check_now(&self, msg: &InboundMessage) -> Option<CycleOutcome> {
        if msg.channel_id != self.post_channel {
            tracing::warn!(
                channel = msg.channel_id,
                author = msg.author_id,
                "checknow refused outside the post channel"
            );
            self.reply_target(msg).say(NOT_AUTHORIZED).await;
            return None;
        }
        let target = ReplyTarget::resolve(self.platform.clone(), msg.channel_id).await;
        Some(self.poller.run_cycle(Trigger::Manual, &target).await)
    }

    pub async fn dispatch(&self, msg: &InboundMessage) {
        match parse_command(&self.prefix, &msg.content) {
            Some(_) if msg.author_is_bot => {}
            Some(Command::Hello) => self.reply_target(msg).say(GREETING).await,
            Some(Command::CheckNow) => {
                if let Some(outcome) = self.check_now(msg).await {
                    tracing::debug!(?outcome, "manual cycle finished");
                }
            }
            Some(Command::Unknown(name)) => tracing::debug!(command = %name, "unknown command"),
            None => {
                if let Some(obs) = &self.observer {
                    obs.observe(msg).await;
                }
            }
        }
    }
}

#[async_trait]
impl InboundHandler for CommandRouter {
    async fn handle(&self, message: InboundMessage) {
        self.dispatch(&message).await;
    }
}
