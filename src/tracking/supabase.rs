// src/tracking/supabase.rs
//! Published-post table behind Supabase's PostgREST endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{PublishedPost, RemoteStore};
use crate::config::SupabaseSettings;

#[derive(Deserialize)]
struct IdRow {
    id: Value,
}

fn id_string(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    key: String,
    table: String,
}

impl SupabaseStore {
    pub fn new(settings: &SupabaseSettings) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: settings.url.trim_end_matches('/').to_string(),
            key: settings.key.clone(),
            table: settings.table.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    async fn select_ids(&self, filter: Option<String>) -> Result<Vec<String>> {
        let mut query = vec![("select", "id".to_string())];
        if let Some(f) = filter {
            query.push(("id", f));
        }
        let rsp = self
            .authed(self.client.get(self.endpoint()))
            .query(&query)
            .send()
            .await
            .context("supabase select")?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            bail!("supabase select returned {status}: {body}");
        }
        let rows: Vec<IdRow> = rsp.json().await.context("decoding supabase rows")?;
        Ok(rows.into_iter().filter_map(|r| id_string(r.id)).collect())
    }

    /// Every stored id, or `None` if the table could not be read.
    pub async fn get_post_ids(&self) -> Option<Vec<String>> {
        match self.select_ids(None).await {
            Ok(ids) => Some(ids),
            Err(e) => {
                tracing::error!(table = %self.table, error = %e, "Error fetching post IDs from Supabase");
                None
            }
        }
    }

    /// Which of `ids` are already stored.
    pub async fn check_entries(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select_ids(Some(format!("in.({})", ids.join(","))))
            .await
    }

    pub async fn insert_entries(&self, records: &[PublishedPost]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let rsp = self
            .authed(self.client.post(self.endpoint()))
            .header("Prefer", "return=minimal")
            .json(records)
            .send()
            .await
            .context("supabase insert")?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            bail!("supabase insert returned {status}: {body}");
        }
        tracing::info!(table = %self.table, count = records.len(), "recorded published posts");
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn get_ids(&self) -> Option<Vec<String>> {
        self.get_post_ids().await
    }

    async fn insert_batch(&self, records: &[PublishedPost]) -> Result<()> {
        self.insert_entries(records).await
    }
}
