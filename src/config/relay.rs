// src/config/relay.rs
//! Process settings: environment variables (optionally from `.env`) with an
//! optional TOML overlay for the non-secret knobs.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

pub const DEFAULT_INTERVAL_SECS: u64 = 7200;
const MIN_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POST_LIMIT: usize = 5;
pub const MAX_POST_LIMIT: usize = 20;
pub const DEFAULT_TABLE: &str = "published_posts";
pub const DEFAULT_SEEN_PATH: &str = "processed_posts.txt";
pub const DEFAULT_PUBLISHED_PATH: &str = "posted_ids.csv";
pub const DEFAULT_MARKERS: [&str; 6] = [
    "rate_0",
    "CherryTomato",
    "GreenPepper",
    "YellowPepper",
    "CarolinaReaper",
    "FIRE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseSettings {
    pub url: String,
    pub key: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub discord_token: String,
    pub post_channel: u64,
    pub interval: Duration,
    pub subreddits: Vec<String>,
    pub flairs: Vec<String>,
    pub post_limit: usize,
    pub reddit: RedditCredentials,
    pub supabase: Option<SupabaseSettings>,
    pub reaction_markers: Vec<String>,
    pub seen_path: PathBuf,
    pub published_path: PathBuf,
    pub command_prefix: String,
    pub max_retries: u32,
    pub metrics_addr: Option<String>,
}

/// Optional file overlay. Every field is optional; present fields win over env.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileOverlay {
    pub interval_secs: Option<u64>,
    pub post_limit: Option<usize>,
    pub subreddits: Option<Vec<String>>,
    pub flairs: Option<Vec<String>>,
    pub reaction_markers: Option<Vec<String>>,
}

impl FileOverlay {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading relay config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

impl Settings {
    /// Reads the real process environment, then applies the TOML overlay:
    /// 1) $RELAY_CONFIG_PATH (must exist)
    /// 2) config/relay.toml (if present)
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::from_lookup(|k| std::env::var(k).ok())?;
        if let Some(overlay) = load_overlay_default()? {
            settings.apply_overlay(overlay);
        }
        Ok(settings)
    }

    /// Builds settings from an arbitrary key lookup. Only the Discord token and the
    /// post channel are mandatory.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let discord_token = get("DISCORD_TOKEN").ok_or_else(|| anyhow!("DISCORD_TOKEN missing"))?;
        let post_channel = get("DISCORD_POST_CHANNEL")
            .ok_or_else(|| anyhow!("DISCORD_POST_CHANNEL missing"))?
            .parse::<u64>()
            .context("DISCORD_POST_CHANNEL must be a numeric channel id")?;

        let interval_secs = get("CHECK_INTERVAL")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let post_limit = get("POST_LIMIT")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POST_LIMIT);

        let reaction_markers = match get("REACTION_MARKERS") {
            Some(v) => split_list(&v),
            None => DEFAULT_MARKERS.iter().map(|s| s.to_string()).collect(),
        };

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(SupabaseSettings {
                url: url.trim_end_matches('/').to_string(),
                key,
                table: get("SUPABASE_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            }),
            (None, None) => None,
            _ => {
                tracing::warn!("SUPABASE_URL and SUPABASE_KEY must both be set; using local tracking");
                None
            }
        };

        let mut settings = Self {
            discord_token,
            post_channel,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            subreddits: get("SUBREDDIT_NAME").map(|v| split_list(&v)).unwrap_or_default(),
            flairs: get("TARGET_FLAIRS").map(|v| split_list(&v)).unwrap_or_default(),
            post_limit: DEFAULT_POST_LIMIT,
            reddit: RedditCredentials {
                client_id: get("REDDIT_CLIENT_ID").unwrap_or_default(),
                client_secret: get("REDDIT_CLIENT_SECRET").unwrap_or_default(),
                user_agent: get("REDDIT_USER_AGENT")
                    .unwrap_or_else(|| format!("reddit-discord-relay/{}", env!("CARGO_PKG_VERSION"))),
                username: get("REDDIT_USERNAME"),
                password: get("REDDIT_PASSWORD"),
            },
            supabase,
            reaction_markers,
            seen_path: get("PROCESSED_POSTS_PATH")
                .unwrap_or_else(|| DEFAULT_SEEN_PATH.to_string())
                .into(),
            published_path: get("POSTED_IDS_PATH")
                .unwrap_or_else(|| DEFAULT_PUBLISHED_PATH.to_string())
                .into(),
            command_prefix: get("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string()),
            max_retries: get("MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            metrics_addr: get("METRICS_ADDR"),
        };
        settings.set_interval_secs(interval_secs);
        settings.set_post_limit(post_limit);
        Ok(settings)
    }

    pub fn apply_overlay(&mut self, overlay: FileOverlay) {
        if let Some(secs) = overlay.interval_secs {
            self.set_interval_secs(secs);
        }
        if let Some(limit) = overlay.post_limit {
            self.set_post_limit(limit);
        }
        if let Some(v) = overlay.subreddits {
            self.subreddits = clean_list(v);
        }
        if let Some(v) = overlay.flairs {
            self.flairs = clean_list(v);
        }
        if let Some(v) = overlay.reaction_markers {
            self.reaction_markers = clean_list(v);
        }
    }

    fn set_interval_secs(&mut self, secs: u64) {
        self.interval = Duration::from_secs(secs.max(MIN_INTERVAL_SECS));
    }

    fn set_post_limit(&mut self, limit: usize) {
        self.post_limit = limit.clamp(1, MAX_POST_LIMIT);
    }
}

fn load_overlay_default() -> Result<Option<FileOverlay>> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        return FileOverlay::load_from(&pb).map(Some);
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default.exists() {
        return FileOverlay::load_from(&default).map(Some);
    }
    Ok(None)
}

/// Comma-separated list: trimmed, empties dropped, order kept.
pub fn split_list(s: &str) -> Vec<String> {
    clean_list(s.split(',').map(str::to_string))
}

fn clean_list(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}
