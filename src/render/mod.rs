// src/render/mod.rs
pub mod mosaic;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::pipeline::ParsedPost;

pub const ATTACHMENT_NAME: &str = "combined.png";
pub const EMBED_COLOR: u32 = 0x00FF00;
/// The compositor never receives more URLs than this.
pub const MAX_GALLERY_IMAGES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

/// Discord embed, serialized as-is into the message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

impl Embed {
    pub fn set_image(&mut self, url: impl Into<String>) {
        self.image = Some(EmbedImage { url: url.into() });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPost {
    pub embed: Embed,
    pub attachment: Option<Attachment>,
}

/// Turns an ordered list of image URLs into one composite PNG.
/// `None` means nothing usable could be produced.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn compose(&self, urls: &[String]) -> Option<Vec<u8>>;
}

pub struct Renderer {
    compositor: Arc<dyn Compositor>,
}

impl Renderer {
    pub fn new(compositor: Arc<dyn Compositor>) -> Self {
        Self { compositor }
    }

    /// `None` when Title, Author or Link is missing; the caller skips the post.
    pub async fn render(&self, post: &ParsedPost) -> Option<RenderedPost> {
        let mut embed = shell(post)?;

        let Some(mut urls) = post.images() else {
            embed.set_image(embed.url.clone());
            return Some(RenderedPost {
                embed,
                attachment: None,
            });
        };

        urls.truncate(MAX_GALLERY_IMAGES);
        let attachment = match self.compositor.compose(&urls).await {
            Some(bytes) => {
                embed.set_image(format!("attachment://{ATTACHMENT_NAME}"));
                Some(Attachment {
                    filename: ATTACHMENT_NAME.to_string(),
                    bytes,
                })
            }
            None => {
                tracing::warn!(url = %embed.url, "gallery mosaic unavailable; sending without image");
                None
            }
        };
        Some(RenderedPost { embed, attachment })
    }
}

/// Title/author/link message shell shared by both paths.
pub fn shell(post: &ParsedPost) -> Option<Embed> {
    match (post.title(), post.author(), post.link()) {
        (Some(title), Some(author), Some(link)) => Some(Embed {
            title: title.to_string(),
            description: format!("New post by {author}"),
            url: link.to_string(),
            color: EMBED_COLOR,
            image: None,
        }),
        _ => {
            let keys: Vec<&str> = post.keys().collect();
            tracing::error!(?keys, "post is missing Title, Author or Link; cannot render");
            None
        }
    }
}
