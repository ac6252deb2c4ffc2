// src/notify/gateway.rs
//! Minimal Discord gateway listener: hello, identify, heartbeat and
//! `MESSAGE_CREATE` dispatch. Reconnects with a fixed delay until shutdown.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use super::discord::DiscordClient;

// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT | DIRECT_MESSAGES
pub const DEFAULT_INTENTS: u64 = 33281;
const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;

/// A chat message as seen by commands and the reaction observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub message_id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
    pub content: String,
    pub attachment_count: usize,
    pub embed_urls: Vec<String>,
    pub embed_count: usize,
}

#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

fn snowflake(v: Option<&Value>) -> Option<u64> {
    v.and_then(Value::as_str).and_then(|s| s.parse().ok())
}

/// Pull the fields the relay uses out of a `MESSAGE_CREATE` payload.
pub fn parse_message_create(d: &Value) -> Option<InboundMessage> {
    let author = d.get("author")?;
    let embeds = d
        .get("embeds")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    Some(InboundMessage {
        channel_id: snowflake(d.get("channel_id"))?,
        guild_id: snowflake(d.get("guild_id")),
        message_id: snowflake(d.get("id"))?,
        author_id: snowflake(author.get("id"))?,
        author_is_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
        content: d
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        attachment_count: d
            .get("attachments")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        embed_urls: embeds
            .iter()
            .filter_map(|e| e.get("url").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        embed_count: embeds.len(),
    })
}

pub struct GatewayListener {
    rest: DiscordClient,
    intents: u64,
    reconnect_delay: Duration,
}

impl GatewayListener {
    pub fn new(rest: DiscordClient) -> Self {
        Self {
            rest,
            intents: DEFAULT_INTENTS,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Keep a session alive until `shutdown` flips to true.
    pub async fn run_forever(
        &self,
        handler: Arc<dyn InboundHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_session(handler.clone(), &mut shutdown).await {
                Ok(()) => break,
                Err(e) => tracing::warn!(error = %e, delay = ?self.reconnect_delay, "gateway session ended, reconnecting"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("gateway listener stopped");
    }

    /// One websocket session. `Ok` only on shutdown.
    async fn run_session(
        &self,
        handler: Arc<dyn InboundHandler>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let base = self.rest.gateway_url().await?;
        let ws_url = format!("{base}/?v=10&encoding=json");
        let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let hello = read.next().await.ok_or_else(|| anyhow!("no hello"))??;
        let hello: Value = match hello {
            Message::Text(text) => serde_json::from_str(&text)?,
            _ => bail!("unexpected gateway hello payload"),
        };
        if hello.get("op").and_then(Value::as_u64) != Some(OP_HELLO) {
            bail!("first gateway frame was not hello");
        }
        let heartbeat_ms = hello
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.rest.token(),
                "intents": self.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": env!("CARGO_PKG_NAME"),
                    "device": env!("CARGO_PKG_NAME")
                }
            }
        });
        write.send(Message::Text(identify.to_string())).await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        let mut seq: Option<u64> = None;
        let mut self_id: Option<u64> = self.rest.bot_user_id();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                _ = heartbeat.tick() => {
                    let beat = json!({"op": OP_HEARTBEAT, "d": seq});
                    write.send(Message::Text(beat.to_string())).await
                        .map_err(|e| anyhow!("gateway heartbeat failed: {e}"))?;
                }
                frame = read.next() => {
                    let raw = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(f))) => bail!("gateway closed: {f:?}"),
                        None => bail!("gateway stream ended"),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => bail!("gateway error: {e}"),
                    };
                    let payload: Value = match serde_json::from_str(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(s) = payload.get("s").and_then(Value::as_u64) {
                        seq = Some(s);
                    }

                    match payload.get("op").and_then(Value::as_u64) {
                        Some(OP_HEARTBEAT) => {
                            let beat = json!({"op": OP_HEARTBEAT, "d": seq});
                            write.send(Message::Text(beat.to_string())).await?;
                            continue;
                        }
                        Some(OP_RECONNECT) => bail!("gateway asked to reconnect"),
                        Some(OP_INVALID_SESSION) => bail!("gateway invalidated the session"),
                        Some(OP_DISPATCH) => {}
                        _ => continue,
                    }

                    let Some(data) = payload.get("d") else { continue };
                    match payload.get("t").and_then(Value::as_str) {
                        Some("READY") => {
                            self_id = snowflake(data.get("user").and_then(|u| u.get("id")));
                            tracing::info!(user = ?self_id, "gateway ready");
                        }
                        Some("MESSAGE_CREATE") => {
                            let Some(msg) = parse_message_create(data) else { continue };
                            if Some(msg.author_id) == self_id {
                                continue;
                            }
                            // handlers may run a whole cycle; keep heartbeats flowing
                            let h = handler.clone();
                            tokio::spawn(async move { h.handle(msg).await });
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
