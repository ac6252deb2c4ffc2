// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod app;
pub mod commands;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod observer;
pub mod pipeline;
pub mod poller;
pub mod publish;
pub mod render;
pub mod retry;
pub mod tracking;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::pipeline::{parse, ParsedPost};
pub use crate::poller::{CycleOutcome, CycleState, Poller, Trigger};
pub use crate::publish::{PublishReport, Publisher};
