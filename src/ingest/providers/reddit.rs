// src/ingest/providers/reddit.rs
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::RedditCredentials;
use crate::ingest::types::{RawItem, SourceError, SourceProvider};
use crate::pipeline::parser::{DELIMITER, IMAGES_KEY};

pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
pub const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";
const UNKNOWN_AUTHOR: &str = "N/A";
/// Author name Reddit reports for removed accounts.
const DELETED_AUTHOR: &str = "[deleted]";
// refresh a minute before reddit expires the token
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Submission,
}

/// The subset of a Reddit link/self post the relay cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_gallery: Option<bool>,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub gallery_data: Option<Value>,
    #[serde(default)]
    pub media_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditProvider {
    client: reqwest::Client,
    creds: RedditCredentials,
    api_base: String,
    auth_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl RedditProvider {
    pub fn new(creds: RedditCredentials) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(creds.user_agent.clone())
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            creds,
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Point both endpoints elsewhere (mock servers in tests).
    pub fn with_endpoints(mut self, api_base: &str, auth_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(tok) = cached.as_ref() {
            if Instant::now() < tok.expires_at {
                return Ok(tok.value.clone());
            }
        }

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let (Some(user), Some(pass)) = (&self.creds.username, &self.creds.password) {
            form = vec![
                ("grant_type", "password".to_string()),
                ("username", user.clone()),
                ("password", pass.clone()),
            ];
        }

        let rsp = self
            .client
            .post(format!("{}/api/v1/access_token", self.auth_base))
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&form)
            .send()
            .await?;
        let status = rsp.status().as_u16();
        if status == 401 || status == 403 {
            return Err(SourceError::Unauthorized { status });
        }
        if status == 429 {
            return Err(SourceError::RateLimited);
        }
        if !rsp.status().is_success() {
            return Err(SourceError::Http { status });
        }
        let body = rsp.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::Decode(format!("token response: {e}")))?;
        let Some(value) = parsed.access_token else {
            tracing::error!(error = ?parsed.error, "reddit refused to issue a token");
            return Err(SourceError::Unauthorized { status });
        };

        let ttl = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl.saturating_sub(TOKEN_SLACK),
        });
        Ok(value)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl SourceProvider for RedditProvider {
    async fn fetch(
        &self,
        source: &str,
        filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RawItem>, SourceError> {
        let token = self.access_token().await?;
        let limit = limit.to_string();

        let req = match filter {
            Some(q) => self
                .client
                .get(format!("{}/r/{}/search", self.api_base, source))
                .query(&[
                    ("q", q),
                    ("restrict_sr", "1"),
                    ("sort", "new"),
                    ("t", "all"),
                    ("limit", limit.as_str()),
                ]),
            None => self
                .client
                .get(format!("{}/r/{}/new", self.api_base, source))
                .query(&[("limit", limit.as_str())]),
        };

        let rsp = req.bearer_auth(token).send().await?;
        let status = rsp.status().as_u16();
        match status {
            401 => {
                self.forget_token().await;
                return Err(SourceError::Unauthorized { status });
            }
            403 => return Err(SourceError::Unauthorized { status }),
            429 => return Err(SourceError::RateLimited),
            s if !(200..300).contains(&s) => return Err(SourceError::Http { status }),
            _ => {}
        }

        let body = rsp.text().await?;
        let listing: Listing = serde_json::from_str(&body)
            .map_err(|e| SourceError::Decode(format!("r/{source} listing: {e}")))?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|c| to_raw_item(&c.data))
            .collect())
    }

    fn name(&self) -> &'static str {
        "reddit"
    }
}

pub fn to_raw_item(sub: &Submission) -> RawItem {
    RawItem {
        id: sub.id.clone(),
        body: compose_blob(sub),
        url: decode(&sub.url),
        is_self: sub.is_self,
        is_gallery: sub.is_gallery.unwrap_or(false),
        is_video: sub.is_video,
    }
}

/// Flatten a submission into the `**Key** value` blob.
///
/// Title and Author always carry a value so the keys after them stay put;
/// an empty link is left out and the post is later dropped as unusable.
pub fn compose_blob(sub: &Submission) -> String {
    let author = sub
        .author
        .as_deref()
        .map(str::trim)
        .filter(|a| *a != DELETED_AUTHOR)
        .unwrap_or_default();

    let mut content = format!(
        "**Title** {}\n**Author** {}\n",
        scrub_or_placeholder(&sub.title),
        scrub_or_placeholder(author)
    );
    let url = decode(&sub.url);

    if sub.is_self {
        content.push_str(&format!("**Text** {}", scrub(&sub.selftext)));
    } else if url.is_empty() {
        tracing::warn!(post_id = %sub.id, "post has no url; leaving Link out");
    } else if sub.is_gallery.unwrap_or(false) {
        content.push_str(&format!("**Link** {url} "));
        let images = gallery_images(sub);
        if images.is_empty() {
            tracing::warn!(post_id = %sub.id, "Gallery post {} had no processable images.", sub.id);
        } else {
            content.push_str(&format!("**{IMAGES_KEY}** {}", images.join(" ")));
        }
    } else {
        content.push_str(&format!("**Link** {url}"));
    }

    content
}

/// Ordered gallery image URLs (`s.u`, or `s.gif` for animated items).
pub fn gallery_images(sub: &Submission) -> Vec<String> {
    let items = sub
        .gallery_data
        .as_ref()
        .and_then(|g| g.get("items"))
        .and_then(Value::as_array);
    let Some(items) = items else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(media_id) = item.get("media_id").and_then(Value::as_str) else {
            continue;
        };
        let source = sub
            .media_metadata
            .as_ref()
            .and_then(|m| m.get(media_id))
            .and_then(|m| m.get("s"));
        let Some(source) = source else {
            tracing::warn!(
                post_id = %sub.id,
                "Media ID {media_id} not found in media_metadata for gallery post {}.",
                sub.id
            );
            continue;
        };
        match source
            .get("u")
            .or_else(|| source.get("gif"))
            .and_then(Value::as_str)
        {
            Some(url) => out.push(decode(url)),
            None => tracing::warn!(post_id = %sub.id, media_id, "gallery item has no usable url"),
        }
    }
    out
}

/// Reddit HTML-escapes text and URLs unless `raw_json=1` is requested.
fn decode(s: &str) -> String {
    html_escape::decode_html_entities(s).trim().to_string()
}

/// Decode entities and strip the field delimiter so user text cannot forge keys.
fn scrub(s: &str) -> String {
    decode(s).replace(DELIMITER, "")
}

fn scrub_or_placeholder(s: &str) -> String {
    let out = scrub(s);
    let out = out.trim();
    if out.is_empty() {
        UNKNOWN_AUTHOR.to_string()
    } else {
        out.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link_post() -> Submission {
        Submission {
            id: "abc".into(),
            title: "Test Submission Title".into(),
            author: Some("TestAuthor".into()),
            url: "http://reddit.com/test_submission".into(),
            ..Default::default()
        }
    }

    #[test]
    fn link_post_blob() {
        let blob = compose_blob(&link_post());
        assert!(blob.contains("**Title** Test Submission Title"));
        assert!(blob.contains("**Author** TestAuthor"));
        assert!(blob.contains("**Link** http://reddit.com/test_submission"));
    }

    #[test]
    fn self_post_has_text_and_no_link() {
        let mut s = link_post();
        s.is_self = true;
        s.selftext = "This is a **bold** test text post.".into();
        let blob = compose_blob(&s);
        assert!(blob.contains("**Text** This is a bold test text post."));
        assert!(!blob.contains("**Link**"));
    }

    #[test]
    fn missing_author_becomes_na() {
        let mut s = link_post();
        s.author = None;
        assert!(compose_blob(&s).contains("**Author** N/A"));
    }

    #[test]
    fn deleted_author_becomes_na() {
        let mut s = link_post();
        s.author = Some("[deleted]".into());
        let parsed = crate::pipeline::parse(&compose_blob(&s));
        assert_eq!(parsed.author(), Some("N/A"));
    }

    #[test]
    fn title_made_only_of_delimiters_keeps_link_in_place() {
        let mut s = link_post();
        s.title = "**".into();
        s.author = Some(" ** ".into());
        s.url = "http://i/x.jpg".into();
        let parsed = crate::pipeline::parse(&compose_blob(&s));
        assert_eq!(parsed.title(), Some("N/A"));
        assert_eq!(parsed.author(), Some("N/A"));
        assert_eq!(parsed.link(), Some("http://i/x.jpg"));
    }

    #[test]
    fn empty_url_gallery_does_not_turn_images_into_link() {
        let mut s = link_post();
        s.url = "  ".into();
        s.is_gallery = Some(true);
        s.gallery_data = Some(json!({"items": [{"media_id": "m1"}]}));
        s.media_metadata = Some(json!({"m1": {"s": {"u": "http://i/1.png"}}}));
        let parsed = crate::pipeline::parse(&compose_blob(&s));
        assert_eq!(parsed.link(), None);
    }

    #[test]
    fn gallery_collects_urls_in_order_and_decodes_entities() {
        let mut s = link_post();
        s.is_gallery = Some(true);
        s.gallery_data = Some(json!({"items": [{"media_id": "m1"}, {"media_id": "m2"}]}));
        s.media_metadata = Some(json!({
            "m1": {"s": {"u": "http://example.com/img1.jpg?width=10&amp;s=x"}},
            "m2": {"s": {"gif": "http://example.com/img2.gif"}}
        }));
        let blob = compose_blob(&s);
        assert!(blob.contains(
            "**IMAGES** http://example.com/img1.jpg?width=10&s=x http://example.com/img2.gif"
        ));
        assert!(blob.contains("**Link** http://reddit.com/test_submission"));
    }

    #[test]
    fn gallery_without_metadata_omits_images() {
        let mut s = link_post();
        s.is_gallery = Some(true);
        s.gallery_data = Some(json!({"items": [{"media_id": "m1"}]}));
        s.media_metadata = Some(json!({}));
        let blob = compose_blob(&s);
        assert!(!blob.contains("IMAGES"));
        assert!(blob.contains("**Link**"));
    }

    #[test]
    fn gallery_blob_round_trips_through_parser() {
        let mut s = link_post();
        s.is_gallery = Some(true);
        s.gallery_data = Some(json!({"items": [{"media_id": "m1"}]}));
        s.media_metadata = Some(json!({"m1": {"s": {"u": "http://i/1.png"}}}));
        let parsed = crate::pipeline::parse(&compose_blob(&s));
        assert_eq!(parsed.images().unwrap(), vec!["http://i/1.png".to_string()]);
        assert_eq!(parsed.author(), Some("TestAuthor"));
    }
}
