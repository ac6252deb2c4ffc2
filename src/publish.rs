// src/publish.rs
//! Per-item delivery: parse, render, send, decorate, record.
//!
//! Items are handled one at a time in key order. A failure on one item never
//! stops the batch; anything that panics inside an item is caught and logged
//! at the item boundary.

use futures_util::FutureExt;
use metrics::counter;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;

use crate::notify::markers::add_reactions;
use crate::notify::{OutgoingMessage, ReactionMarker, ReplyTarget};
use crate::pipeline::parse;
use crate::render::Renderer;
use crate::tracking::{PublishedPost, TrackingStore};

#[derive(Debug)]
enum ItemOutcome {
    Published(PublishedPost),
    /// Not deliverable as-is (missing fields, render failure). Never retried.
    Unusable,
    /// Send failed; the item stays pending for the next cycle.
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub published: Vec<PublishedPost>,
    pub already_published: Vec<String>,
    pub unusable: Vec<String>,
    pub failed: Vec<String>,
    /// The batch could not be written to any tracking store.
    pub persist_failed: bool,
    /// Left untouched because a stop was requested; still pending.
    pub not_attempted: Vec<String>,
}

impl PublishReport {
    /// Ids that reached a final state and can leave the pending map.
    pub fn settled(&self) -> impl Iterator<Item = &str> {
        self.published
            .iter()
            .map(|p| p.id.as_str())
            .chain(self.already_published.iter().map(String::as_str))
            .chain(self.unusable.iter().map(String::as_str))
    }
}

pub struct Publisher {
    renderer: Renderer,
}

impl Publisher {
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }

    /// Deliver every item not already in `published`, then persist the
    /// cycle's deliveries in one batch and merge them into `published`.
    pub async fn publish<S: TrackingStore + ?Sized>(
        &self,
        items: &BTreeMap<String, String>,
        target: &ReplyTarget,
        markers: &[ReactionMarker],
        published: &mut HashSet<String>,
        store: &S,
    ) -> PublishReport {
        self.publish_until(items, target, markers, published, store, || false)
            .await
    }

    /// Same as [`Publisher::publish`], but `stop` is checked before each item.
    /// Once it returns true the remaining items are left untouched; whatever
    /// was delivered so far is still recorded.
    pub async fn publish_until<S, F>(
        &self,
        items: &BTreeMap<String, String>,
        target: &ReplyTarget,
        markers: &[ReactionMarker],
        published: &mut HashSet<String>,
        store: &S,
        stop: F,
    ) -> PublishReport
    where
        S: TrackingStore + ?Sized,
        F: Fn() -> bool,
    {
        let mut report = PublishReport::default();

        for (id, blob) in items {
            if !report.not_attempted.is_empty() || stop() {
                report.not_attempted.push(id.clone());
                continue;
            }
            if published.contains(id) {
                tracing::info!(post_id = %id, "Post ID {id} already published. Skipping.");
                report.already_published.push(id.clone());
                continue;
            }

            let outcome = AssertUnwindSafe(self.publish_one(id, blob, target, markers))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(post_id = %id, "unexpected failure while publishing; item skipped");
                    ItemOutcome::Unusable
                });

            match outcome {
                ItemOutcome::Published(p) => {
                    counter!("relay_posts_published_total").increment(1);
                    report.published.push(p);
                }
                ItemOutcome::Unusable => {
                    counter!("relay_posts_skipped_total").increment(1);
                    report.unusable.push(id.clone());
                }
                ItemOutcome::Failed => report.failed.push(id.clone()),
            }
        }

        if !report.not_attempted.is_empty() {
            tracing::warn!(
                remaining = report.not_attempted.len(),
                "stop requested; remaining posts left pending"
            );
        }

        if !report.published.is_empty() {
            if let Err(e) = store.insert(&report.published).await {
                tracing::error!(
                    error = %e,
                    count = report.published.len(),
                    "could not record published posts"
                );
                report.persist_failed = true;
            }
            // merged even when persistence failed so this process never repeats them
            published.extend(report.published.iter().map(|p| p.id.clone()));
        }

        report
    }

    async fn publish_one(
        &self,
        id: &str,
        blob: &str,
        target: &ReplyTarget,
        markers: &[ReactionMarker],
    ) -> ItemOutcome {
        let post = parse(blob);
        if post.link().is_none() {
            tracing::warn!(post_id = %id, "post has no Link; skipping");
            return ItemOutcome::Unusable;
        }

        let Some(rendered) = self.renderer.render(&post).await else {
            tracing::warn!(post_id = %id, "post could not be rendered; skipping");
            return ItemOutcome::Unusable;
        };
        let record = PublishedPost {
            id: id.to_string(),
            title: rendered.embed.title.clone(),
            author: post.author().unwrap_or_default().to_string(),
        };

        let sent = match target.send(&OutgoingMessage::post(rendered)).await {
            Ok(sent) => sent,
            Err(e) if e.is_forbidden() => {
                tracing::error!(
                    post_id = %id,
                    channel = %target.info(),
                    "Bot lacks permissions to send messages in channel {}. Post ID: {id}",
                    target.info()
                );
                return ItemOutcome::Failed;
            }
            Err(e) => {
                tracing::error!(post_id = %id, channel = %target.info(), error = %e, "failed to send post");
                return ItemOutcome::Failed;
            }
        };

        let reactions = add_reactions(target.platform().as_ref(), target.info(), &sent, markers).await;
        tracing::info!(
            post_id = %id,
            message_id = sent.message_id,
            reactions = reactions.added,
            "published post"
        );
        ItemOutcome::Published(record)
    }
}
