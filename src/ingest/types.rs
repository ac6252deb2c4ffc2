// src/ingest/types.rs

/// One submission pulled from a source, already flattened into the
/// `**Key** value` blob the parser understands.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub id: String,
    pub body: String,
    pub url: String,
    pub is_self: bool,
    pub is_gallery: bool,
    pub is_video: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("source rate limited the request")]
    RateLimited,
    #[error("source returned HTTP {status}")]
    Http { status: u16 },
    #[error("source request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed listing: {0}")]
    Decode(String),
}

impl SourceError {
    /// Credentials and malformed payloads fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Unauthorized { .. } | SourceError::Decode(_) => false,
            SourceError::RateLimited | SourceError::Transport(_) => true,
            SourceError::Http { status } => *status >= 500,
        }
    }
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Most recent items of `source`, optionally narrowed by a search expression.
    async fn fetch(
        &self,
        source: &str,
        filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RawItem>, SourceError>;

    fn name(&self) -> &'static str;
}
