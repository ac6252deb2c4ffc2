// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tokio::sync::watch;

/// One-time metric descriptions (so series show up on /metrics).
pub fn describe_relay_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_cycles_total", "Poll cycles started.");
        describe_counter!(
            "relay_posts_fetched_total",
            "New posts pulled from sources."
        );
        describe_counter!(
            "relay_posts_published_total",
            "Posts delivered to the channel."
        );
        describe_counter!(
            "relay_posts_skipped_total",
            "Posts dropped as unusable (missing fields, render failure)."
        );
        describe_counter!(
            "relay_source_errors_total",
            "Source fetch failures, including retried ones."
        );
        describe_counter!(
            "relay_cycle_busy_total",
            "Cycle requests refused because one was already running."
        );
        describe_gauge!("relay_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if another recorder is installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_relay_metrics();
        Ok(Self { handle })
    }

    /// `/metrics` in Prometheus exposition format, plus `/health`.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route("/health", get(|| async { "ok" }))
    }

    pub async fn serve(self, addr: &str, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics listener on {addr}"))?;
        tracing::info!(addr, "metrics endpoint listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
            .context("metrics server")
    }
}
