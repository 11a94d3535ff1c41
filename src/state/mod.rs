//! State module for tracking ingestion progress
//!
//! # Components
//!
//! - `RunStatus`: the run state machine (`running -> succeeded | failed`)
//! - `IngestionRun`: one run's counters and timestamps
//! - `SchedulerStatus`: the read-only snapshot served to status queries

mod run;

pub use run::{IngestionRun, RunStatus, TriggerSource};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the scheduler
///
/// `active_run` is present if and only if a run is executing; it carries the
/// run's live counters. `last_run` is the newest finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub active_run: Option<IngestionRun>,
    pub last_run: Option<IngestionRun>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

impl SchedulerStatus {
    pub fn is_running(&self) -> bool {
        self.active_run.is_some()
    }
}
