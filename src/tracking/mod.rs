// src/tracking/mod.rs
//! Delivery tracking: the local seen set, the local published CSV and an
//! optional remote store. `Tracker` is the only place that decides between
//! remote and local.

pub mod local;
pub mod supabase;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub use local::LocalFiles;
pub use supabase::SupabaseStore;

/// One delivered post, as recorded in tracking storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    pub title: String,
    pub author: String,
}

/// Remote published-post store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `None` when the store could not be read.
    async fn get_ids(&self) -> Option<Vec<String>>;
    async fn insert_batch(&self, records: &[PublishedPost]) -> Result<()>;
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Seen set persisted by a previous run. Missing storage is an empty set.
    async fn load(&self) -> HashSet<String>;
    async fn save(&self, seen: &HashSet<String>) -> Result<()>;
    /// Remote published ids; `None` if no remote is configured or it failed.
    async fn get_remote_ids(&self) -> Option<Vec<String>>;
    /// Record a batch of deliveries. An empty batch is a no-op.
    async fn insert(&self, records: &[PublishedPost]) -> Result<()>;
    /// Every id that must not be delivered again.
    async fn published_ids(&self) -> HashSet<String>;
}

pub struct Tracker {
    local: LocalFiles,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl Tracker {
    pub fn new(local: LocalFiles, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &LocalFiles {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[async_trait]
impl TrackingStore for Tracker {
    async fn load(&self) -> HashSet<String> {
        self.local.load_seen().await
    }

    async fn save(&self, seen: &HashSet<String>) -> Result<()> {
        self.local.save_seen(seen).await
    }

    async fn get_remote_ids(&self) -> Option<Vec<String>> {
        match &self.remote {
            Some(r) => r.get_ids().await,
            None => None,
        }
    }

    async fn insert(&self, records: &[PublishedPost]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(remote) = &self.remote {
            match remote.insert_batch(records).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!(
                    error = %e,
                    count = records.len(),
                    "remote store insert failed; recording locally"
                ),
            }
        }
        self.local.append_published(records).await
    }

    async fn published_ids(&self) -> HashSet<String> {
        // local rows are always included: they hold anything a failed remote
        // insert fell back to
        let mut ids = self.local.published_ids().await;
        if let Some(remote) = &self.remote {
            match remote.get_ids().await {
                Some(remote_ids) => ids.extend(remote_ids),
                None => tracing::warn!("remote store unavailable; using local tracking file"),
            }
        }
        ids
    }
}
