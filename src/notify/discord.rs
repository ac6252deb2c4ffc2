// src/notify/discord.rs
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChannelInfo, ChatPlatform, OutgoingMessage, PlatformError, Reactor, ReactionMarker, SentMessage};
use crate::render::Embed;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
/// Upper bound on a server-requested rate-limit wait.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(3600);

/// Bot-token REST client for the handful of endpoints the relay touches.
#[derive(Clone)]
pub struct DiscordClient {
    token: String,
    client: Client,
    api_base: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DiscordClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The first token segment is the bot's user id, base64 encoded.
    pub fn bot_user_id(&self) -> Option<u64> {
        let first = self.token.split('.').next()?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(first.trim_end_matches('='))
            .ok()?;
        String::from_utf8(decoded).ok()?.parse().ok()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Run a request with the bounded retry policy. `build` is called once per
    /// attempt because multipart bodies cannot be replayed.
    async fn execute<F>(&self, what: &str, build: F) -> Result<Response, PlatformError>
    where
        F: Fn() -> Result<RequestBuilder, PlatformError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let req = build()?
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .timeout(self.timeout);

            let res = match req.send().await {
                Ok(rsp) => classify(rsp).await,
                Err(e) => Err(PlatformError::Transport(e)),
            };

            match res {
                Ok(rsp) => return Ok(rsp),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let mut delay = self.retry.delay_for(attempt);
                    if let PlatformError::RateLimited { retry_after } = e {
                        delay = delay.max(rate_limit_wait(retry_after));
                    }
                    tracing::warn!(what, attempt, error = %e, ?delay, "discord call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Websocket URL for the gateway.
    pub async fn gateway_url(&self) -> Result<String, PlatformError> {
        let rsp = self
            .execute("gateway", || Ok(self.client.get(self.url("/gateway/bot"))))
            .await?;
        let body: GatewayBot = decode(rsp).await?;
        Ok(body.url)
    }
}

async fn classify(rsp: Response) -> Result<Response, PlatformError> {
    let status = rsp.status().as_u16();
    if rsp.status().is_success() {
        return Ok(rsp);
    }
    let body = rsp.text().await.unwrap_or_default();
    match status {
        403 => Err(PlatformError::Forbidden(body)),
        429 => {
            let retry_after = serde_json::from_str::<RateLimitBody>(&body)
                .map(|b| b.retry_after)
                .unwrap_or(1.0);
            Err(PlatformError::RateLimited { retry_after })
        }
        _ => Err(PlatformError::Http { status, body }),
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(rsp: Response) -> Result<T, PlatformError> {
    let text = rsp.text().await?;
    serde_json::from_str(&text).map_err(|e| PlatformError::Decode(e.to_string()))
}

/// `retry_after` comes from the response body; anything that is not a finite,
/// non-negative number of seconds means "no extra wait".
fn rate_limit_wait(retry_after: f64) -> Duration {
    if !retry_after.is_finite() || retry_after <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(retry_after)
        .unwrap_or(MAX_RATE_LIMIT_WAIT)
        .min(MAX_RATE_LIMIT_WAIT)
}

fn parse_snowflake(s: &str) -> Result<u64, PlatformError> {
    s.parse()
        .map_err(|_| PlatformError::Decode(format!("bad snowflake {s:?}")))
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Deserialize)]
struct GatewayBot {
    url: String,
}

#[derive(Deserialize)]
struct MessageObject {
    id: String,
    channel_id: String,
}

#[derive(Deserialize)]
struct ChannelObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Deserialize)]
struct EmojiObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct AttachmentRef<'a> {
    id: u32,
    filename: &'a str,
}

#[derive(Serialize)]
struct MessagePayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<&'a Embed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentRef<'a>>,
}

impl<'a> MessagePayload<'a> {
    fn from_message(m: &'a OutgoingMessage) -> Self {
        Self {
            content: m.content.as_deref(),
            embeds: m.embed.iter().collect(),
            attachments: m
                .attachment
                .iter()
                .map(|a| AttachmentRef {
                    id: 0,
                    filename: &a.filename,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Reactor for DiscordClient {
    async fn react(
        &self,
        message: &SentMessage,
        marker: &ReactionMarker,
    ) -> Result<(), PlatformError> {
        let url = self.url(&format!(
            "/channels/{}/messages/{}/reactions/{}/@me",
            message.channel_id,
            message.message_id,
            urlencoding::encode(&marker.handle)
        ));
        self.execute("react", || {
            Ok(self.client.put(&url).header(CONTENT_LENGTH, 0))
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn send(
        &self,
        channel_id: u64,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, PlatformError> {
        let url = self.url(&format!("/channels/{channel_id}/messages"));
        let payload = serde_json::to_string(&MessagePayload::from_message(message))
            .map_err(|e| PlatformError::Decode(e.to_string()))?;

        let rsp = match &message.attachment {
            None => {
                self.execute("send", || {
                    Ok(self
                        .client
                        .post(&url)
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(payload.clone()))
                })
                .await?
            }
            Some(att) => {
                self.execute("send", || {
                    let file = Part::bytes(att.bytes.clone())
                        .file_name(att.filename.clone())
                        .mime_str("image/png")?;
                    let form = Form::new()
                        .text("payload_json", payload.clone())
                        .part("files[0]", file);
                    Ok(self.client.post(&url).multipart(form))
                })
                .await?
            }
        };

        let sent: MessageObject = decode(rsp).await?;
        Ok(SentMessage {
            channel_id: parse_snowflake(&sent.channel_id)?,
            message_id: parse_snowflake(&sent.id)?,
        })
    }

    async fn channel_lookup(&self, channel_id: u64) -> Result<ChannelInfo, PlatformError> {
        let url = self.url(&format!("/channels/{channel_id}"));
        let rsp = self.execute("channel", || Ok(self.client.get(&url))).await?;
        let ch: ChannelObject = decode(rsp).await?;
        let id = parse_snowflake(&ch.id)?;
        Ok(ChannelInfo {
            id,
            name: ch.name.unwrap_or_else(|| id.to_string()),
            guild_id: ch.guild_id.as_deref().map(parse_snowflake).transpose()?,
        })
    }

    async fn guild_markers(&self, guild_id: u64) -> Result<Vec<(String, String)>, PlatformError> {
        let url = self.url(&format!("/guilds/{guild_id}/emojis"));
        let rsp = self.execute("emojis", || Ok(self.client.get(&url))).await?;
        let emoji: Vec<EmojiObject> = decode(rsp).await?;
        Ok(emoji
            .into_iter()
            .filter_map(|e| Some((e.name?, e.id?)))
            .collect())
    }
}
