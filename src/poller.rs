// src/poller.rs
//! Cycle driver. One cycle runs at a time: a second request while a cycle is
//! in flight is refused instead of queued.

use metrics::{counter, gauge};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::PostMonitor;
use crate::notify::markers::resolve_markers;
use crate::notify::ReplyTarget;
use crate::publish::{PublishReport, Publisher};
use crate::tracking::TrackingStore;

pub const BUSY_NOTICE: &str = "A check is already running, try again shortly.";
pub const CHECKING_NOTICE: &str = "Checking for new posts...";
pub const NOTHING_NEW_NOTICE: &str = "No new content to process.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Filtering,
    Publishing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub publish: PublishReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    NothingNew { fetched: usize },
    Busy,
    Stopped,
}

struct Tracked {
    monitor: PostMonitor,
    published: HashSet<String>,
}

pub struct Poller {
    tracked: Mutex<Tracked>,
    /// Copy of the seen set taken outside the cycle lock, so shutdown can
    /// flush it while a cycle is still in flight.
    seen_snapshot: std::sync::Mutex<HashSet<String>>,
    state: watch::Sender<CycleState>,
    store: Arc<dyn TrackingStore>,
    publisher: Publisher,
    marker_names: Vec<String>,
}

impl Poller {
    pub fn new(
        monitor: PostMonitor,
        store: Arc<dyn TrackingStore>,
        publisher: Publisher,
        marker_names: Vec<String>,
    ) -> Self {
        let (state, _) = watch::channel(CycleState::Idle);
        Self {
            tracked: Mutex::new(Tracked {
                monitor,
                published: Default::default(),
            }),
            seen_snapshot: Default::default(),
            state,
            store,
            publisher,
            marker_names,
        }
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    fn enter(&self, next: CycleState) {
        // Stopped is terminal
        self.state.send_if_modified(|s| {
            if *s == CycleState::Stopped || *s == next {
                return false;
            }
            *s = next;
            true
        });
    }

    fn stopped(&self) -> bool {
        self.state() == CycleState::Stopped
    }

    fn snapshot_seen(&self, monitor: &PostMonitor) {
        if let Ok(mut snap) = self.seen_snapshot.lock() {
            snap.clone_from(monitor.processed());
        }
    }

    async fn save_seen(&self, seen: &HashSet<String>) -> anyhow::Result<()> {
        self.store.save(seen).await?;
        tracing::info!(seen = seen.len(), "seen set flushed");
        Ok(())
    }

    /// A cycle that notices the stop flag persists its own view before
    /// returning, which may be newer than what shutdown flushed.
    async fn stop_cycle(&self, monitor: &PostMonitor) -> CycleOutcome {
        self.snapshot_seen(monitor);
        if let Err(e) = self.save_seen(monitor.processed()).await {
            tracing::error!(error = %e, "could not flush seen set after stop");
        }
        CycleOutcome::Stopped
    }

    /// Load the seen set and the tracking set before the first cycle.
    pub async fn start(&self) {
        let seen = self.store.load().await;
        let published = self.store.published_ids().await;
        tracing::info!(seen = seen.len(), published = published.len(), "tracking state loaded");
        let mut t = self.tracked.lock().await;
        t.monitor.set_processed(seen);
        t.published = published;
        self.snapshot_seen(&t.monitor);
    }

    /// Run one fetch → filter → publish pass.
    pub async fn run_cycle(&self, trigger: Trigger, target: &ReplyTarget) -> CycleOutcome {
        if self.stopped() {
            return CycleOutcome::Stopped;
        }
        let Ok(mut t) = self.tracked.try_lock() else {
            counter!("relay_cycle_busy_total").increment(1);
            match trigger {
                Trigger::Manual => target.say(BUSY_NOTICE).await,
                Trigger::Timer => tracing::info!("previous cycle still running; tick skipped"),
            }
            return CycleOutcome::Busy;
        };
        counter!("relay_cycles_total").increment(1);
        tracing::info!(?trigger, channel = %target.info(), "cycle started");
        target.say(CHECKING_NOTICE).await;

        self.enter(CycleState::Fetching);
        let fetched = t.monitor.collect().await;
        self.snapshot_seen(&t.monitor);
        if self.stopped() {
            return self.stop_cycle(&t.monitor).await;
        }

        self.enter(CycleState::Filtering);
        let tracked = self.store.published_ids().await;
        t.published.extend(tracked);
        let Tracked { monitor, published } = &mut *t;
        let (seen_pruned, pending_pruned) = monitor.prune(published);
        self.snapshot_seen(monitor);
        tracing::debug!(seen_pruned, pending_pruned, "pruned tracking sets");

        if monitor.pending().is_empty() {
            target.say(NOTHING_NEW_NOTICE).await;
            self.enter(CycleState::Idle);
            gauge!("relay_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
            return CycleOutcome::NothingNew { fetched };
        }
        if self.stopped() {
            return self.stop_cycle(monitor).await;
        }

        self.enter(CycleState::Publishing);
        let markers =
            resolve_markers(target.platform().as_ref(), target.guild_id(), &self.marker_names)
                .await;
        let report = self
            .publisher
            .publish_until(
                monitor.pending(),
                target,
                &markers,
                published,
                self.store.as_ref(),
                || self.stopped(),
            )
            .await;
        let settled: Vec<String> = report.settled().map(str::to_string).collect();
        monitor.settle(settled.iter().map(String::as_str));
        if self.stopped() {
            tracing::info!(
                published = report.published.len(),
                left_pending = report.not_attempted.len(),
                "cycle interrupted by shutdown"
            );
            return self.stop_cycle(monitor).await;
        }

        tracing::info!(
            fetched,
            published = report.published.len(),
            unusable = report.unusable.len(),
            failed = report.failed.len(),
            "cycle finished"
        );
        self.enter(CycleState::Idle);
        gauge!("relay_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
        CycleOutcome::Completed(CycleReport {
            fetched,
            publish: report,
        })
    }

    /// Enter the terminal state and flush the seen set. A running cycle gets
    /// `grace` to reach its next stop check; if it does not, the snapshot
    /// taken after its last fetch is written instead.
    pub async fn shutdown(&self, grace: Duration) -> anyhow::Result<()> {
        self.state.send_replace(CycleState::Stopped);
        match tokio::time::timeout(grace, self.tracked.lock()).await {
            Ok(t) => {
                self.snapshot_seen(&t.monitor);
                self.save_seen(t.monitor.processed()).await
            }
            Err(_) => {
                tracing::warn!(?grace, "cycle still running; flushing last seen snapshot");
                let snapshot = match self.seen_snapshot.lock() {
                    Ok(s) => s.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                self.save_seen(&snapshot).await
            }
        }
    }

    /// Timer loop: first tick fires immediately, later ticks every `period`.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        target: ReplyTarget,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let CycleOutcome::Stopped = self.run_cycle(Trigger::Timer, &target).await {
                            break;
                        }
                    }
                }
            }
            tracing::info!("poller stopped");
        })
    }
}
