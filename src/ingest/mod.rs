// src/ingest/mod.rs
//! Fetch-and-track layer: pulls new submissions from every configured source,
//! remembers which ids were already pulled, and holds their blobs until they
//! are published or dropped.

pub mod providers;
pub mod types;

use metrics::counter;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::ingest::types::SourceProvider;
use crate::pipeline::dedup;
use crate::retry::RetryPolicy;

/// `flair:"A"` for one flair, `(flair:"A" OR flair:"B")` for several, `None` for none.
pub fn build_flair_query<S: AsRef<str>>(flairs: &[S]) -> Option<String> {
    let escaped: Vec<String> = flairs
        .iter()
        .map(|f| f.as_ref().trim())
        .filter(|f| !f.is_empty())
        .map(|f| format!("flair:\"{f}\""))
        .collect();
    match escaped.len() {
        0 => None,
        1 => escaped.into_iter().next(),
        _ => Some(format!("({})", escaped.join(" OR "))),
    }
}

pub struct PostMonitor {
    provider: Arc<dyn SourceProvider>,
    sources: Vec<String>,
    flair_query: Option<String>,
    limit: usize,
    retry: RetryPolicy,
    processed: HashSet<String>,
    content: BTreeMap<String, String>,
}

impl PostMonitor {
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        sources: Vec<String>,
        flairs: &[String],
        limit: usize,
    ) -> Self {
        Self {
            provider,
            sources,
            flair_query: build_flair_query(flairs),
            limit,
            retry: RetryPolicy::default(),
            processed: HashSet::new(),
            content: BTreeMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn flair_query(&self) -> Option<&str> {
        self.flair_query.as_deref()
    }

    pub fn processed(&self) -> &HashSet<String> {
        &self.processed
    }

    pub fn set_processed(&mut self, ids: HashSet<String>) {
        self.processed = ids;
    }

    /// Blobs fetched but not yet published, keyed by post id.
    pub fn pending(&self) -> &BTreeMap<String, String> {
        &self.content
    }

    /// Fetch every configured source once. Returns the number of new blobs.
    pub async fn collect(&mut self) -> usize {
        if self.sources.is_empty() {
            tracing::warn!("No subreddit names configured. Skipping fetch.");
            return 0;
        }
        let sources = self.sources.clone();
        let mut added = 0;
        for source in &sources {
            added += self.collect_source(source).await;
        }
        added
    }

    /// Fetch one source with bounded retries. A source that keeps failing is
    /// skipped for this cycle; the others still run.
    pub async fn collect_source(&mut self, source: &str) -> usize {
        let mut attempt = 0u32;
        let items = loop {
            attempt += 1;
            match self
                .provider
                .fetch(source, self.flair_query.as_deref(), self.limit)
                .await
            {
                Ok(items) => break items,
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(source, attempt, error = %e, ?delay, "source error, retrying");
                    counter!("relay_source_errors_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(source, error = %e, "Max retries reached for r/{source}");
                    counter!("relay_source_errors_total").increment(1);
                    return 0;
                }
                Err(e) => {
                    tracing::error!(source, error = %e, "source failed, not retrying");
                    counter!("relay_source_errors_total").increment(1);
                    return 0;
                }
            }
        };

        let mut added = 0;
        for item in items {
            if self.processed.contains(&item.id) {
                continue;
            }
            self.processed.insert(item.id.clone());
            if item.is_video {
                tracing::info!(post_id = %item.id, "Post {} is a video. Skipping.", item.id);
                continue;
            }
            self.content.insert(item.id, item.body);
            added += 1;
        }

        counter!("relay_posts_fetched_total").increment(added as u64);
        tracing::debug!(source, added, "source fetched");
        added
    }

    /// Drop ids that are already published from both the seen set and the
    /// pending blobs. Returns (seen_pruned, pending_pruned).
    pub fn prune(&mut self, published: &HashSet<String>) -> (usize, usize) {
        let seen_pruned = dedup::prune_seen(&mut self.processed, published);
        let (kept, pending_pruned) = dedup::filter(std::mem::take(&mut self.content), published);
        self.content = kept;
        (seen_pruned, pending_pruned)
    }

    /// Forget pending blobs that reached a final state (published or unusable).
    pub fn settle<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for id in ids {
            self.content.remove(id);
        }
    }
}
