// src/tracking/local.rs
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::PublishedPost;

/// File-backed tracking: one id per line for the seen set, and a
/// header + rows CSV (`id,title,author`) for published posts.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    seen_path: PathBuf,
    published_path: PathBuf,
}

impl LocalFiles {
    pub fn new(seen_path: impl Into<PathBuf>, published_path: impl Into<PathBuf>) -> Self {
        Self {
            seen_path: seen_path.into(),
            published_path: published_path.into(),
        }
    }

    pub fn seen_path(&self) -> &Path {
        &self.seen_path
    }

    pub fn published_path(&self) -> &Path {
        &self.published_path
    }

    pub async fn load_seen(&self) -> HashSet<String> {
        match tokio::fs::read_to_string(&self.seen_path).await {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                tracing::warn!(path = %self.seen_path.display(), error = %e, "could not read seen set");
                HashSet::new()
            }
        }
    }

    /// Replace the seen file. Written to a sibling temp file first, then renamed.
    pub async fn save_seen(&self, seen: &HashSet<String>) -> Result<()> {
        let mut ids: Vec<&str> = seen.iter().map(String::as_str).collect();
        ids.sort_unstable();
        let mut body = ids.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }

        let tmp = self.seen_path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.seen_path)
            .await
            .with_context(|| format!("replacing {}", self.seen_path.display()))?;
        Ok(())
    }

    pub async fn read_published(&self) -> Result<Vec<PublishedPost>> {
        let bytes = match tokio::fs::read(&self.published_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading {}", self.published_path.display()))
            }
        };

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes.as_slice());
        let mut out = Vec::new();
        for (line, row) in rdr.deserialize::<PublishedPost>().enumerate() {
            match row {
                Ok(p) => out.push(p),
                Err(e) => tracing::warn!(
                    path = %self.published_path.display(),
                    row = line + 1,
                    error = %e,
                    "skipping malformed tracking row"
                ),
            }
        }
        Ok(out)
    }

    pub async fn published_ids(&self) -> HashSet<String> {
        match self.read_published().await {
            Ok(rows) => rows.into_iter().map(|p| p.id).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "local tracking file unreadable; treating as empty");
                HashSet::new()
            }
        }
    }

    /// Append rows; the header is written only when the file is new or empty.
    pub async fn append_published(&self, records: &[PublishedPost]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let is_new = match tokio::fs::metadata(&self.published_path).await {
            Ok(m) => m.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("inspecting {}", self.published_path.display()))
            }
        };

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(Vec::new());
        for r in records {
            wtr.serialize(r).context("encoding tracking row")?;
        }
        let buf = wtr
            .into_inner()
            .map_err(|e| anyhow!("flushing tracking rows: {}", e.error()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.published_path)
            .await
            .with_context(|| format!("opening {}", self.published_path.display()))?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}
